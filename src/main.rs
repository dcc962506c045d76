use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use supervisor::config::{self as config, SupervisorConfig};
use supervisor::{AgentOptions, Supervisor};

#[derive(Parser)]
#[command(name = "agent-supervisor")]
#[command(about = "Run a local ngrok agent and report its API address", long_about = None)]
struct Cli {
    /// Custom configuration directory (default: system config location)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable verbose logging (shows info level logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent, print its API address and keep it running until Ctrl-C
    Start {
        /// Tunnel region (e.g. us, eu, ap)
        #[arg(short, long)]
        region: Option<String>,

        /// Agent configuration file passed through as --config
        #[arg(long)]
        agent_config: Option<PathBuf>,

        /// Enable or disable request inspection
        #[arg(long)]
        inspect: Option<bool>,

        /// Directory containing the agent binary
        #[arg(long)]
        bin_dir: Option<PathBuf>,

        /// Give up if the agent is not ready after this many seconds
        #[arg(long)]
        startup_timeout: Option<u64>,
    },

    /// Save an authtoken into the agent's configuration
    Authtoken {
        token: String,

        /// Agent configuration file passed through as --config
        #[arg(long)]
        agent_config: Option<PathBuf>,

        /// Directory containing the agent binary
        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(ref dir) = cli.config_dir {
        config::set_config_dir(dir.clone());
    }

    let log_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
        )
        .init();

    let mut cfg = SupervisorConfig::load()?;

    match cli.command {
        Commands::Start {
            region,
            agent_config,
            inspect,
            bin_dir,
            startup_timeout,
        } => {
            // Flags override the config file.
            cfg.region = region.or(cfg.region);
            cfg.agent_config = agent_config.or(cfg.agent_config);
            cfg.inspect = inspect.or(cfg.inspect);
            cfg.bin_dir = bin_dir.or(cfg.bin_dir);
            cfg.startup_timeout_secs = startup_timeout.or(cfg.startup_timeout_secs);

            let supervisor = Supervisor::from_config(&cfg);
            info!("Starting agent from {}", supervisor.bin_dir().display());

            let endpoint = supervisor
                .acquire(&cfg.agent_options())
                .await
                .context("Agent failed to start")?;
            println!("Agent API: {}", endpoint);

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutting down agent");
            supervisor.release().await;
        }

        Commands::Authtoken {
            token,
            agent_config,
            bin_dir,
        } => {
            cfg.bin_dir = bin_dir.or(cfg.bin_dir);
            let supervisor = Supervisor::from_config(&cfg);
            let opts = AgentOptions {
                authtoken: Some(token),
                config_path: agent_config.or(cfg.agent_config),
                ..Default::default()
            };
            supervisor
                .set_authtoken(&opts)
                .await
                .context("Failed to save authtoken")?;
            println!("Authtoken saved");
        }

        Commands::Status => {
            println!("Config:          {}", SupervisorConfig::config_path().display());
            println!("Binary dir:      {}", cfg.resolved_bin_dir().display());
            println!("Region:          {}", cfg.region.as_deref().unwrap_or("(agent default)"));
            println!(
                "Agent config:    {}",
                cfg.agent_config
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(agent default)".to_string())
            );
            println!(
                "Inspect:         {}",
                cfg.inspect.map(|i| i.to_string()).unwrap_or_else(|| "(agent default)".to_string())
            );
            match cfg.startup_timeout_secs {
                Some(secs) => println!("Startup timeout: {}s", secs),
                None => println!("Startup timeout: none"),
            }
        }
    }

    Ok(())
}
