use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::agent::{default_bin_dir, spawn_agent};
use crate::authtoken::run_authtoken;
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::log_scan::{scan_startup_output, truncate_output, OutputLines, StartupSignal};
use crate::options::AgentOptions;

type StartFuture = Shared<BoxFuture<'static, Result<String, SupervisorError>>>;

/// Size of the single stderr read that decides a failed start.
const STDERR_CHUNK: usize = 64 * 1024;

/// Lifecycle of the supervised agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Ready,
}

/// Handle on the agent once it reported ready. The monitor task owns the child.
struct ActiveProcess {
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<()>,
    exited: watch::Receiver<bool>,
}

#[derive(Default)]
struct State {
    /// Bumped for every start attempt so cleanup from an older attempt is ignored.
    generation: u64,
    pending: Option<StartFuture>,
    active: Option<ActiveProcess>,
}

struct Inner {
    bin_dir: PathBuf,
    startup_timeout: Option<Duration>,
    state: Mutex<State>,
}

impl Inner {
    async fn clear(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.pending = None;
            state.active = None;
        }
    }
}

/// Runs at most one agent process and hands out its local API endpoint.
///
/// Cloning yields another handle on the same agent. Dropping the last handle
/// terminates the agent.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(default_bin_dir())
    }
}

impl Supervisor {
    /// Supervisor looking for the agent binary in `bin_dir`, waiting indefinitely for readiness.
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self::with_startup_timeout(bin_dir, None)
    }

    /// Like [`Supervisor::new`], but a start fails with `Timeout` once `startup_timeout`
    /// passes without a ready line. `None` waits forever.
    pub fn with_startup_timeout(bin_dir: impl Into<PathBuf>, startup_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bin_dir: bin_dir.into(),
                startup_timeout,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::with_startup_timeout(config.resolved_bin_dir(), config.startup_timeout())
    }

    /// Default directory the agent binary is resolved against.
    pub fn bin_dir(&self) -> &Path {
        &self.inner.bin_dir
    }

    /// Return the agent's API endpoint, starting the agent if needed.
    ///
    /// Concurrent callers share one start attempt and see the same outcome.
    /// Once the agent is ready, later calls return the same endpoint until it exits.
    pub async fn acquire(&self, opts: &AgentOptions) -> Result<String, SupervisorError> {
        let start = {
            let mut state = self.inner.state.lock().await;
            match state.pending.clone() {
                Some(pending) => {
                    debug!("Joining existing agent start");
                    pending
                }
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let task = tokio::spawn(start_agent(
                        Arc::downgrade(&self.inner),
                        self.inner.bin_dir.clone(),
                        self.inner.startup_timeout,
                        opts.clone(),
                        generation,
                    ));
                    let start = async move { task.await.unwrap_or(Err(SupervisorError::Aborted)) }
                        .boxed()
                        .shared();
                    state.pending = Some(start.clone());
                    start
                }
            }
        };
        start.await
    }

    /// Terminate the running agent and wait for it to exit. No-op when nothing is running.
    pub async fn release(&self) {
        let handle = {
            let state = self.inner.state.lock().await;
            state
                .active
                .as_ref()
                .map(|a| (a.kill_tx.clone(), a.exited.clone()))
        };
        let Some((kill_tx, mut exited)) = handle else {
            debug!("No active agent to release");
            return;
        };
        let _ = kill_tx.send(());
        let _ = exited.wait_for(|done| *done).await;
    }

    /// `Ready` once the agent reported its address, `Starting` while a start is in flight.
    pub async fn state(&self) -> SupervisorState {
        let state = self.inner.state.lock().await;
        if state.active.is_some() {
            SupervisorState::Ready
        } else if state.pending.is_some() {
            SupervisorState::Starting
        } else {
            SupervisorState::Idle
        }
    }

    /// Process id of the ready agent, if any.
    pub async fn active_pid(&self) -> Option<u32> {
        let state = self.inner.state.lock().await;
        state.active.as_ref().and_then(|a| a.pid)
    }

    /// Run `authtoken` against the agent binary in this supervisor's directory.
    pub async fn set_authtoken(&self, opts: &AgentOptions) -> Result<(), SupervisorError> {
        run_authtoken(&self.inner.bin_dir, opts).await
    }
}

async fn start_agent(
    inner: Weak<Inner>,
    default_dir: PathBuf,
    startup_timeout: Option<Duration>,
    opts: AgentOptions,
    generation: u64,
) -> Result<String, SupervisorError> {
    let mut args: Vec<String> = ["start", "--none", "--log=stdout"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(opts.option_args());
    let dir = opts.working_dir(&default_dir);

    let launched = match spawn_agent(&dir, &args) {
        Ok(child) => wait_for_ready(child, startup_timeout).await,
        Err(e) => Err(e),
    };

    let Some(inner) = inner.upgrade() else {
        return Err(SupervisorError::Aborted);
    };

    let (endpoint, child, stdout, stderr) = match launched {
        Ok(ready) => ready,
        Err(e) => {
            warn!("Agent failed to start: {}", e);
            inner.clear(generation).await;
            return Err(e);
        }
    };

    let (kill_tx, kill_rx) = mpsc::unbounded_channel();
    let (exited_tx, exited_rx) = watch::channel(false);
    {
        let mut state = inner.state.lock().await;
        state.active = Some(ActiveProcess {
            pid: child.id(),
            kill_tx,
            exited: exited_rx,
        });
    }

    drain_output(stdout, stderr);
    tokio::spawn(monitor(Arc::downgrade(&inner), generation, child, kill_rx, exited_tx));

    info!("Agent ready, API at {}", endpoint);
    Ok(endpoint)
}

/// Scan agent output until it reports ready, fails, exits, or the timeout passes.
/// The child is killed on every failure path.
async fn wait_for_ready(
    mut child: Child,
    startup_timeout: Option<Duration>,
) -> Result<(String, Child, OutputLines<ChildStdout>, ChildStderr), SupervisorError> {
    let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill().await;
        return Err(std::io::Error::other("agent output not captured").into());
    };

    let mut lines = OutputLines::new(stdout);
    let mut err_buf = vec![0u8; STDERR_CHUNK];
    let mut stdout_open = true;
    let mut stderr_open = true;

    let deadline = async {
        match startup_timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            biased;

            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    debug!("agent: {}", line);
                    match scan_startup_output(&line) {
                        Some(StartupSignal::Ready(endpoint)) => break Ok(endpoint),
                        Some(StartupSignal::BindConflict(msg)) => {
                            break Err(SupervisorError::BindConflict(msg))
                        }
                        None => {}
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!("Error reading agent stdout: {}", e);
                    stdout_open = false;
                }
            },

            read = stderr.read(&mut err_buf), if stderr_open => match read {
                Ok(0) => stderr_open = false,
                Ok(n) => {
                    let msg = String::from_utf8_lossy(&err_buf[..n]);
                    break Err(SupervisorError::Stderr(truncate_output(&msg)));
                }
                Err(e) => {
                    warn!("Error reading agent stderr: {}", e);
                    stderr_open = false;
                }
            },

            status = child.wait() => {
                break Err(match status {
                    Ok(status) => SupervisorError::Exited(status),
                    Err(e) => e.into(),
                });
            }

            _ = &mut deadline => {
                break Err(SupervisorError::Timeout(startup_timeout.unwrap_or_default()));
            }
        }
    };

    match outcome {
        Ok(endpoint) => Ok((endpoint, child, lines, stderr)),
        Err(e) => {
            if let Err(kill_err) = child.kill().await {
                debug!("Agent already gone after failed start: {}", kill_err);
            }
            Err(e)
        }
    }
}

/// Keep reading agent output after startup so its pipes never fill. Nothing is parsed.
fn drain_output(mut stdout: OutputLines<ChildStdout>, stderr: ChildStderr) {
    tokio::spawn(async move {
        loop {
            match stdout.next_line().await {
                Ok(Some(line)) => debug!("agent: {}", line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading agent stdout: {}", e);
                    break;
                }
            }
        }
        debug!("Agent stdout reader task ended");
    });

    tokio::spawn(async move {
        let mut lines = OutputLines::new(stderr);
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => warn!("agent stderr: {}", line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading agent stderr: {}", e);
                    break;
                }
            }
        }
        debug!("Agent stderr reader task ended");
    });
}

/// Own the ready agent until it exits or is asked to stop, then clear the
/// supervisor's records and publish the exit.
async fn monitor(
    inner: Weak<Inner>,
    generation: u64,
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
    exited_tx: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Also fires when every sender is gone, i.e. the supervisor was dropped.
        _ = kill_rx.recv() => {
            info!("Terminating agent process");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill agent process: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => info!("Agent process exited ({})", status),
        Err(e) => warn!("Failed to wait for agent process: {}", e),
    }

    if let Some(inner) = inner.upgrade() {
        inner.clear(generation).await;
    }
    let _ = exited_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_supervisor_is_idle() {
        let sup = Supervisor::new("/nonexistent");
        assert_eq!(sup.state().await, SupervisorState::Idle);
        assert_eq!(sup.active_pid().await, None);
    }

    #[tokio::test]
    async fn release_when_idle_is_noop() {
        let sup = Supervisor::new("/nonexistent");
        sup.release().await;
        sup.release().await;
        assert_eq!(sup.state().await, SupervisorState::Idle);
    }

    #[tokio::test]
    async fn missing_binary_fails_and_returns_to_idle() {
        let dir = tempfile::TempDir::new().unwrap();
        let sup = Supervisor::new(dir.path());

        let err = sup.acquire(&AgentOptions::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert_eq!(sup.state().await, SupervisorState::Idle);

        // A retry starts a fresh attempt instead of replaying the failure.
        let err = sup.acquire(&AgentOptions::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn bin_dir_transform_is_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let redirected = dir.path().join("elsewhere");
        let target = redirected.clone();
        let sup = Supervisor::new(dir.path());
        let opts = AgentOptions::new().with_bin_dir(move |_| target.clone());

        match sup.acquire(&opts).await.unwrap_err() {
            SupervisorError::Spawn { path, .. } => assert!(path.starts_with(&redirected)),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn from_config_uses_configured_dir() {
        let config = SupervisorConfig {
            bin_dir: Some(PathBuf::from("/opt/agent/bin")),
            ..Default::default()
        };
        let sup = Supervisor::from_config(&config);
        assert_eq!(sup.bin_dir(), Path::new("/opt/agent/bin"));
    }
}
