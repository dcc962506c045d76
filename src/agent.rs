//! Locating and spawning the agent binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::SupervisorError;

/// File name of the agent binary on this platform.
pub fn binary_name() -> &'static str {
    if cfg!(windows) {
        "ngrok.exe"
    } else {
        "ngrok"
    }
}

/// Default directory holding the agent binary: `bin/` next to the running executable.
pub fn default_bin_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("bin")))
        .unwrap_or_else(|| PathBuf::from("bin"))
}

/// Spawn `<dir>/<binary> <args..>` with `dir` as its working directory.
/// stdout and stderr are piped; the child is killed if its handle is dropped.
pub(crate) fn spawn_agent(dir: &Path, args: &[String]) -> Result<Child, SupervisorError> {
    let path = dir.join(binary_name());
    debug!("Spawning {} {}", path.display(), args.join(" "));

    Command::new(&path)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SupervisorError::Spawn {
            path,
            source: Arc::new(e),
        })
}
