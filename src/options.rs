use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maps the default binary directory to the directory actually used.
pub type BinDirFn = Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>;

/// Per-call options passed through to the agent binary.
#[derive(Clone, Default)]
pub struct AgentOptions {
    /// Tunnel region code (`--region`).
    pub region: Option<String>,
    /// Agent configuration file (`--config`).
    pub config_path: Option<PathBuf>,
    /// Enable or disable request inspection (`--inspect`).
    pub inspect: Option<bool>,
    /// Credential for the `authtoken` command.
    pub authtoken: Option<String>,
    /// Redirects the directory the binary is looked up and run in.
    pub bin_dir: Option<BinDirFn>,
}

impl fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentOptions")
            .field("region", &self.region)
            .field("config_path", &self.config_path)
            .field("inspect", &self.inspect)
            .field("authtoken", &self.authtoken.as_ref().map(|_| "<redacted>"))
            .field("bin_dir", &self.bin_dir.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl AgentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_inspect(mut self, inspect: bool) -> Self {
        self.inspect = Some(inspect);
        self
    }

    pub fn with_authtoken(mut self, token: impl Into<String>) -> Self {
        self.authtoken = Some(token.into());
        self
    }

    pub fn with_bin_dir<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) -> PathBuf + Send + Sync + 'static,
    {
        self.bin_dir = Some(Arc::new(f));
        self
    }

    /// Flags derived from the options, in `--region`, `--config`, `--inspect` order.
    /// Absent or empty values contribute nothing.
    pub fn option_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(region) = self.region.as_deref().filter(|r| !r.is_empty()) {
            args.push(format!("--region={}", region));
        }
        if let Some(path) = self.config_path.as_deref().filter(|p| !p.as_os_str().is_empty()) {
            args.push(format!("--config={}", path.display()));
        }
        if let Some(inspect) = self.inspect {
            args.push(format!("--inspect={}", inspect));
        }
        args
    }

    /// Directory to run the agent in: `default`, passed through `bin_dir` when set.
    pub fn working_dir(&self, default: &Path) -> PathBuf {
        match &self.bin_dir {
            Some(f) => f(default),
            None => default.to_path_buf(),
        }
    }
}
