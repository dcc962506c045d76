//! SupervisorConfig — persisted defaults for launching the agent.
//!
//! Stored as `supervisor.toml` in the platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::agent::default_bin_dir;
use crate::options::AgentOptions;

const CONFIG_FILE: &str = "supervisor.toml";

/// Custom config directory (set via --config-dir).
static CUSTOM_CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Set a custom config directory (call before any config operations).
pub fn set_config_dir(path: PathBuf) {
    CUSTOM_CONFIG_DIR.set(path).ok();
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SupervisorConfig {
    /// Directory holding the agent binary. Defaults to `bin/` next to this executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,

    /// Tunnel region passed as `--region`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Agent configuration file passed as `--config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspect: Option<bool>,

    /// Seconds to wait for the agent to report ready. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout_secs: Option<u64>,
}

impl SupervisorConfig {
    /// Path to `supervisor.toml` in the active config dir.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE)
    }

    /// Config directory (system default or custom override).
    pub fn config_dir() -> PathBuf {
        if let Some(custom) = CUSTOM_CONFIG_DIR.get() {
            return custom.clone();
        }
        directories::ProjectDirs::from("com", "agent-supervisor", "agent-supervisor")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Load from the default location, or return defaults.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&Self::config_dir())
    }

    /// Load `supervisor.toml` from `dir`, or return defaults if it does not exist.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_dir(&Self::config_dir())
    }

    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        let text = toml::to_string_pretty(self).context("Failed to serialize SupervisorConfig")?;
        fs::write(&path, &text).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    pub fn resolved_bin_dir(&self) -> PathBuf {
        self.bin_dir.clone().unwrap_or_else(default_bin_dir)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_secs.map(Duration::from_secs)
    }

    /// Agent options carrying the configured passthrough flags.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            region: self.region.clone(),
            config_path: self.agent_config.clone(),
            inspect: self.inspect,
            ..Default::default()
        }
    }
}
