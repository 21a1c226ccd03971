use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdout};
use tracing::{info, warn};

/// Operating-system identifier of a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process after termination
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Exited(status) => write!(f, "{status}"),
            ProcessStatus::Terminated => f.write_str("terminated"),
        }
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// The process is gone, whoever ended it
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// Everything a platform manager needs to spawn the driver
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Pipe stdout/stderr so they can be forwarded to sinks
    pub capture_output: bool,
    pub hide_window: bool,
}

/// Trait representing a handle to a running process
///
/// Handles are owned by whoever spawned them; dropping a handle kills the process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Try to get exit status without blocking, reaping an exited child
    fn try_wait(&self) -> Result<Option<ProcessStatus>>;

    /// Check if the process is still running (non-blocking)
    fn is_running(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process and wait for it to be reaped
    async fn kill(&mut self) -> Result<()>;

    /// Request a kill without waiting, usable from `Drop`
    fn start_kill(&mut self) -> Result<()>;

    /// Take the piped output streams, if they were captured
    fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>);
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle;

    /// Spawn a new process as described by the request
    async fn spawn_process(&self, request: &LaunchRequest) -> std::io::Result<Self::Handle>;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut Self::Handle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match timeout {
            Some(duration) => tokio::time::timeout(duration, handle.wait())
                .await
                .map_err(|_| anyhow::anyhow!("Timeout waiting for process exit"))?,
            None => handle.wait().await,
        }
    }
}

/// Trait for process termination including the driver's descendants
#[async_trait]
pub trait ProcessTermination: ProcessLifecycle {
    /// Ask a single process to exit (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut Self::Handle) -> TerminationResult;

    /// Force kill a process and everything it spawned
    async fn force_kill(&self, handle: &mut Self::Handle) -> TerminationResult;

    /// Find all descendant processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Complete stop strategy: graceful request, bounded wait, then force kill
    ///
    /// A failed force kill is attempted exactly once more before it is reported.
    async fn shutdown(&self, handle: &mut Self::Handle, grace: Duration) -> TerminationResult {
        if !handle.is_running() {
            return TerminationResult::ProcessNotFound;
        }

        match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                if self.wait_for_exit(handle, Some(grace)).await.is_ok() {
                    return TerminationResult::Success;
                }
                info!(
                    pid = ?handle.get_pid(),
                    "Process still running after {grace:?} grace period, forcing"
                );
            }
            TerminationResult::ProcessNotFound => return TerminationResult::ProcessNotFound,
            other => {
                warn!(pid = ?handle.get_pid(), result = ?other, "Graceful termination failed");
            }
        }

        match self.force_kill(handle).await {
            result if result.is_gone() => result,
            first => {
                warn!(result = ?first, "Force kill failed, retrying once");
                self.force_kill(handle).await
            }
        }
    }
}

/// High-level process manager trait that combines lifecycle and termination
pub trait ProcessManager: ProcessTermination {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
