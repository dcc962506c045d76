//! One-shot `authtoken` command.

use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tracing::{debug, info};

use crate::agent::{default_bin_dir, spawn_agent};
use crate::error::SupervisorError;
use crate::options::{AgentOptions, BinDirFn};

/// Save `token` into the agent's configuration.
pub async fn set_authtoken(
    token: &str,
    config_path: Option<PathBuf>,
    bin_dir: Option<BinDirFn>,
) -> Result<(), SupervisorError> {
    let opts = AgentOptions {
        authtoken: Some(token.to_string()),
        config_path,
        bin_dir,
        ..Default::default()
    };
    set_authtoken_with_options(&opts).await
}

/// Run `<bin> authtoken <token> [flags]` from the default binary directory.
pub async fn set_authtoken_with_options(opts: &AgentOptions) -> Result<(), SupervisorError> {
    run_authtoken(&default_bin_dir(), opts).await
}

pub(crate) async fn run_authtoken(default_dir: &Path, opts: &AgentOptions) -> Result<(), SupervisorError> {
    let token = opts
        .authtoken
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(SupervisorError::MissingAuthtoken)?;

    let mut args = vec!["authtoken".to_string(), token.to_string()];
    args.extend(opts.option_args());
    let dir = opts.working_dir(default_dir);

    let mut child = spawn_agent(&dir, &args)?;
    let outcome = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => first_output(&mut child, stdout, stderr).await,
        _ => Err(std::io::Error::other("agent output not captured").into()),
    };

    // One-shot: never leave the process behind, whatever it said.
    if let Err(e) = child.kill().await {
        debug!("authtoken process already exited: {}", e);
    }

    if outcome.is_ok() {
        info!("Authtoken saved");
    }
    outcome
}

/// Decide on the first output event: stdout means saved, stderr means rejected.
async fn first_output(
    child: &mut Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
) -> Result<(), SupervisorError> {
    let mut out_buf = [0u8; 1024];
    let mut err_buf = [0u8; 1024];
    let mut stdout_open = true;
    let mut stderr_open = true;

    loop {
        tokio::select! {
            biased;

            read = stdout.read(&mut out_buf), if stdout_open => match read {
                Ok(0) | Err(_) => stdout_open = false,
                Ok(n) => {
                    debug!("authtoken: {}", String::from_utf8_lossy(&out_buf[..n]).trim_end());
                    return Ok(());
                }
            },

            read = stderr.read(&mut err_buf), if stderr_open => match read {
                Ok(0) | Err(_) => stderr_open = false,
                Ok(n) => {
                    debug!("authtoken stderr: {}", String::from_utf8_lossy(&err_buf[..n]).trim_end());
                    return Err(SupervisorError::TokenRejected);
                }
            },

            status = child.wait() => {
                let status = status?;
                return if status.success() {
                    Ok(())
                } else {
                    Err(SupervisorError::Exited(status))
                };
            }
        }
    }
}
