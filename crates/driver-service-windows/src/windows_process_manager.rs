use anyhow::Result;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use sysinfo::System;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{info, warn};

use driver_service_core::*;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Mutex<Child>,
    pid: Option<ProcessId>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id().map(ProcessId::from),
            child: Mutex::new(child),
        }
    }

    /// Fire-and-forget `taskkill /F /T`, usable where nothing can be awaited
    fn kill_tree_detached(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        let spawned = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            warn!(pid=%pid.0, error=%e, "Failed to run taskkill for process tree");
        }
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn child_mut(&mut self) -> &mut Child {
        self.child.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn try_wait(&self) -> Result<Option<ProcessStatus>> {
        match self.child().try_wait()? {
            Some(status) => Ok(Some(ProcessStatus::Exited(status))),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self.child_mut().wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child_mut()
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }

    fn start_kill(&mut self) -> Result<()> {
        self.kill_tree_detached();
        self.child_mut()
            .start_kill()
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }

    fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        let child = self.child_mut();
        (child.stdout.take(), child.stderr.take())
    }
}

impl Drop for WindowsProcessHandle {
    fn drop(&mut self) {
        if matches!(self.child_mut().try_wait(), Ok(None)) {
            self.kill_tree_detached();
        }
    }
}

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager {
    system: Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    type Handle = WindowsProcessHandle;

    async fn spawn_process(&self, request: &LaunchRequest) -> std::io::Result<WindowsProcessHandle> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);

        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        if request.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        #[cfg(windows)]
        if request.hide_window {
            cmd.creation_flags(windows::Win32::System::Threading::CREATE_NO_WINDOW.0);
        }

        let child = cmd.spawn()?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                command = %request.program.display(),
                args = ?request.args,
                hidden = request.hide_window,
                "Spawned Windows process"
            );
        }

        Ok(WindowsProcessHandle::new(child))
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut WindowsProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        // Console drivers ignore WM_CLOSE, so taskkill without /F is only a request
        match self.taskkill(pid.0, false).await {
            Ok(true) => {
                info!(pid=%pid.0, "Sent graceful termination to process");
                TerminationResult::Success
            }
            Ok(false) if !handle.is_running() => TerminationResult::ProcessNotFound,
            Ok(false) => {
                warn!(pid=%pid.0, "Graceful termination was refused");
                TerminationResult::Failed("taskkill refused graceful termination".to_string())
            }
            Err(e) => {
                warn!(pid=%pid.0, error=%e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut WindowsProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        if let Err(e) = self.taskkill_tree(pid.0).await {
            warn!(pid=%pid.0, error=%e, "taskkill /T failed, killing descendants individually");
            if let Ok(children) = self.find_child_processes(pid).await {
                for child in children {
                    let _ = self.taskkill(child.0, true).await;
                }
            }
        }

        match handle.kill().await {
            Ok(()) => {
                info!(pid=%pid.0, "Force killed process");
                TerminationResult::Success
            }
            Err(e) => match handle.try_wait() {
                Ok(Some(_)) => TerminationResult::ProcessNotFound,
                _ => {
                    warn!(pid=%pid.0, error=%e, "Failed to force kill process");
                    TerminationResult::Failed(format!("Force kill failed: {e}"))
                }
            },
        }
    }

    async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::everything(),
        );

        let mut children = Vec::new();
        Self::find_children_recursive(&system, parent_pid.0, &mut children);

        Ok(children.into_iter().map(ProcessId::from).collect())
    }
}

impl WindowsProcessManager {
    /// Use taskkill to terminate a single process
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill").args(&args).output().await?;

        Ok(output.status.success())
    }

    /// Use taskkill with /T to terminate a process tree
    async fn taskkill_tree(&self, pid: u32) -> Result<bool> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        Ok(output.status.success())
    }

    /// Recursively find all child processes, deepest first
    fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
        for (pid, process) in system.processes() {
            if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                let child_pid = pid.as_u32();
                Self::find_children_recursive(system, child_pid, result);
                result.push(child_pid);
            }
        }
    }
}

impl ProcessManager for WindowsProcessManager {
    fn new() -> Self {
        info!("Initializing Windows process manager");
        Self {
            system: Mutex::new(System::new()),
        }
    }
}
