//! Sandboxed Launcher
//!
//! Starts a legacy executable pinned to a single core, waits for it in a
//! background task, and kills every descendant it leaves behind.
//! One launcher runs at most one session at a time.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::affinity;
use super::process_tree::{self, CleanupSummary};
use crate::core::{LaunchRequest, ProcessHandle, ProcessState};
use crate::logging::CHILD_TARGET;

/// `CREATE_NO_WINDOW` process creation flag
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How often `shutdown` re-checks a session that is still being spawned
const STARTING_POLL: Duration = Duration::from_millis(10);

/// Launcher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherOptions {
    /// Core the process should be pinned to, when the host may use it
    pub affinity_core: usize,
    /// Show a console window for the program (Windows)
    pub show_window: bool,
    /// Maximum snapshot-and-kill rounds after the main process ends
    pub cleanup_sweeps: u32,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            affinity_core: 0,
            show_window: true,
            cleanup_sweeps: 3,
        }
    }
}

/// Launch failures visible to callers
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to start {path}: {message}")]
    SpawnFailed { path: PathBuf, message: String },

    #[error("A launch session is already running")]
    AlreadyRunning,
}

impl LaunchError {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            LaunchError::SpawnFailed { .. } => "spawn-failed",
            LaunchError::AlreadyRunning => "already-running",
        }
    }
}

/// Final account of one launch session
#[derive(Debug, Clone, Serialize)]
pub struct ExitReport {
    pub session_id: Uuid,
    pub pid: u32,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub affinity_mask: u64,
    pub descendants_terminated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// `Ok` once the program started and its session was cleaned up
pub type LaunchOutcome = Result<ExitReport, LaunchError>;

struct ActiveSession {
    id: Uuid,
    /// `None` while the process is being spawned
    handle: Option<ProcessHandle>,
    stop: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Slot {
    session: Mutex<Option<ActiveSession>>,
    idle: Notify,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the slot for one session and frees it when dropped, including when
/// the supervising task panics.
struct SlotGuard {
    slot: Arc<Slot>,
    id: Uuid,
}

impl SlotGuard {
    /// Publish the freshly spawned process, still `Starting`
    fn track(&self, handle: ProcessHandle) {
        if let Some(session) = self.slot.lock().as_mut().filter(|s| s.id == self.id) {
            session.handle = Some(handle);
        }
    }

    fn activate(&self, affinity_mask: u64, stop: oneshot::Sender<()>) {
        if let Some(session) = self.slot.lock().as_mut().filter(|s| s.id == self.id) {
            if let Some(handle) = session.handle.as_mut() {
                handle.affinity_mask = affinity_mask;
                handle.state = ProcessState::Running;
            }
            session.stop = Some(stop);
        }
    }

    fn set_state(&self, state: ProcessState) {
        if let Some(session) = self.slot.lock().as_mut().filter(|s| s.id == self.id) {
            if let Some(handle) = session.handle.as_mut() {
                handle.state = state;
            }
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut session = self.slot.lock();
            if session.as_ref().is_some_and(|s| s.id == self.id) {
                *session = None;
            }
        }
        self.slot.idle.notify_waiters();
    }
}

/// A running session
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    pid: u32,
    affinity_mask: u64,
    started_at: DateTime<Utc>,
    task: JoinHandle<ExitReport>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn affinity_mask(&self) -> u64 {
        self.affinity_mask
    }

    /// Wait until the process has ended and its descendants were cleaned up
    pub async fn wait(self) -> ExitReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                // The slot guard already released the session
                tracing::error!(session = %self.id, pid = self.pid, "Session supervisor failed: {}", e);
                ExitReport {
                    session_id: self.id,
                    pid: self.pid,
                    state: ProcessState::Terminated,
                    exit_code: None,
                    affinity_mask: self.affinity_mask,
                    descendants_terminated: 0,
                    started_at: self.started_at,
                    finished_at: Utc::now(),
                }
            }
        }
    }
}

/// Single-session process launcher
pub struct Launcher {
    options: LauncherOptions,
    slot: Arc<Slot>,
}

impl Launcher {
    pub fn new(options: LauncherOptions) -> Self {
        Self {
            options,
            slot: Arc::new(Slot::default()),
        }
    }

    /// Start the program and return once it is running.
    ///
    /// Must be called inside a tokio runtime; the wait and cleanup happen on
    /// a spawned task.
    pub fn start(&self, request: &LaunchRequest) -> Result<SessionHandle, LaunchError> {
        let guard = self.reserve()?;
        let session_id = guard.id;
        let span = tracing::info_span!("launch", session = %session_id);
        let _entered = span.enter();

        tracing::info!(
            executable = %request.executable().display(),
            cwd = %request.working_directory().display(),
            args = ?request.arguments(),
            "Starting program"
        );

        let mut child = build_command(request, &self.options).spawn().map_err(|e| {
            tracing::warn!(error = %e, "Program failed to start");
            LaunchError::SpawnFailed {
                path: request.executable().to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let Some(pid) = child.id() else {
            let _ = child.start_kill();
            return Err(LaunchError::SpawnFailed {
                path: request.executable().to_path_buf(),
                message: "process exited before its pid could be read".to_string(),
            });
        };
        let root_started = process_tree::start_time(pid);
        guard.track(ProcessHandle::new(pid, 0));

        let affinity_mask = match affinity::pin_to_single_core(pid, self.options.affinity_core) {
            Ok(mask) => {
                tracing::debug!(pid, mask = %format!("{mask:#x}"), "Pinned to one core");
                mask
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "Could not pin program to one core");
                affinity::single_core_mask(self.options.affinity_core)
            }
        };

        forward_output(pid, child.stdout.take(), "stdout");
        forward_output(pid, child.stderr.take(), "stderr");

        let (stop_tx, stop_rx) = oneshot::channel();
        guard.activate(affinity_mask, stop_tx);

        let started_at = Utc::now();
        tracing::info!(pid, "Program running");

        let supervisor = Supervisor {
            child,
            pid,
            affinity_mask,
            started_at,
            root_started,
            sweeps: self.options.cleanup_sweeps,
            guard,
        };
        let task = tokio::spawn(supervisor.run(stop_rx).instrument(span.clone()));

        Ok(SessionHandle {
            id: session_id,
            pid,
            affinity_mask,
            started_at,
            task,
        })
    }

    /// Start the program and wait for the whole session to finish
    pub async fn launch(&self, request: &LaunchRequest) -> LaunchOutcome {
        let session = self.start(request)?;
        Ok(session.wait().await)
    }

    /// The running process, if any
    pub fn active(&self) -> Option<ProcessHandle> {
        self.slot.lock().as_ref().and_then(|s| s.handle.clone())
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Force-stop the running session and wait until its descendants are
    /// cleaned up. Returns immediately when nothing is running.
    pub async fn shutdown(&self) {
        loop {
            let idle = self.slot.idle.notified();

            let (stop, starting) = {
                let mut session = self.slot.lock();
                match session.as_mut() {
                    None => return,
                    Some(active) => (
                        active.stop.take(),
                        active
                            .handle
                            .as_ref()
                            .map_or(true, |h| h.state == ProcessState::Starting),
                    ),
                }
            };

            if let Some(stop) = stop {
                tracing::info!("Stopping running session");
                let _ = stop.send(());
                idle.await;
                return;
            }

            if starting {
                tokio::time::sleep(STARTING_POLL).await;
                continue;
            }

            // Someone else already asked it to stop
            idle.await;
            return;
        }
    }

    fn reserve(&self) -> Result<SlotGuard, LaunchError> {
        let mut session = self.slot.lock();
        if session.is_some() {
            tracing::warn!("Launch rejected: a session is already running");
            return Err(LaunchError::AlreadyRunning);
        }

        let id = Uuid::new_v4();
        *session = Some(ActiveSession {
            id,
            handle: None,
            stop: None,
        });

        Ok(SlotGuard {
            slot: Arc::clone(&self.slot),
            id,
        })
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new(LauncherOptions::default())
    }
}

struct Supervisor {
    child: Child,
    pid: u32,
    affinity_mask: u64,
    started_at: DateTime<Utc>,
    /// OS start time of the program, used to spot a reused pid
    root_started: Option<u64>,
    sweeps: u32,
    guard: SlotGuard,
}

impl Supervisor {
    async fn run(mut self, stop: oneshot::Receiver<()>) -> ExitReport {
        let pid = self.pid;

        let (state, exit_code) = tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) => {
                    tracing::info!(pid, code = ?status.code(), "Program exited");
                    (ProcessState::Exited, status.code())
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Lost track of program; cleaning up anyway");
                    (ProcessState::Exited, None)
                }
            },
            Ok(()) = stop => {
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(pid, error = %e, "Kill failed; program may already be gone");
                }
                tracing::info!(pid, "Program terminated");
                (ProcessState::Terminated, None)
            }
        };

        self.guard.set_state(state);

        let sweeps = self.sweeps;
        let root_started = self.root_started;
        let cleanup = tokio::task::spawn_blocking(move || {
            process_tree::terminate_tree(pid, root_started, sweeps)
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(pid, "Descendant cleanup did not finish: {}", e);
            CleanupSummary::default()
        });
        let descendants_terminated = cleanup.killed;

        tracing::info!(
            pid,
            descendants_terminated,
            survivors = cleanup.survivors.len(),
            "Session finished"
        );

        ExitReport {
            session_id: self.guard.id,
            pid,
            state,
            exit_code,
            affinity_mask: self.affinity_mask,
            descendants_terminated,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
        // guard drops here, after cleanup
    }
}

fn build_command(request: &LaunchRequest, options: &LauncherOptions) -> Command {
    let mut command = Command::new(request.executable());
    command
        .args(request.arguments())
        .current_dir(request.working_directory())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // A host torn down mid-session must not leave the game behind
        .kill_on_drop(true);

    // Own process group, so helpers stay findable after re-parenting
    #[cfg(unix)]
    command.process_group(0);

    #[cfg(windows)]
    if !options.show_window {
        command.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(not(windows))]
    let _ = options.show_window;

    command
}

/// Relay a child's output stream into the log, line by line
fn forward_output<R>(pid: u32, stream: Option<R>, name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };

    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).split(b'\n');
        while let Ok(Some(line)) = lines.next_segment().await {
            let line = String::from_utf8_lossy(&line);
            tracing::debug!(target: CHILD_TARGET, pid, stream = name, "{}", line.trim_end());
        }
    });
}
