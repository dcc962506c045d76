use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the supervisor and the token setter.
///
/// `Clone` so a single start outcome can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum SupervisorError {
    #[error("Failed to spawn agent binary {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },
    /// The agent could not bind its local API address.
    #[error("{0}")]
    BindConflict(String),
    /// The agent wrote to stderr while starting.
    #[error("{0}")]
    Stderr(String),
    #[error("cant set authtoken")]
    TokenRejected,
    #[error("No authtoken given")]
    MissingAuthtoken,
    #[error("Agent exited before becoming ready ({0})")]
    Exited(ExitStatus),
    #[error("Agent did not become ready within {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("Agent I/O error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("Agent start was aborted")]
    Aborted,
}

impl From<std::io::Error> for SupervisorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
