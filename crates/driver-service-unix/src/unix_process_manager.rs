#[cfg(unix)]
mod unix_impl {
    use anyhow::Result;
    use async_trait::async_trait;
    use driver_service_core::{
        LaunchRequest, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
        ProcessStatus, ProcessTermination, TerminationResult,
    };
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use sysinfo::System;
    use tokio::process::{Child, ChildStderr, ChildStdout, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Mutex<Child>,
        pid: Option<ProcessId>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child) -> Self {
            Self {
                pid: child.id().map(ProcessId::from),
                child: Mutex::new(child),
            }
        }

        /// SIGKILL the process group the driver leads, descendants included
        fn kill_group(&self) {
            let Some(pid) = self.pid else {
                return;
            };
            match signal::killpg(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL) {
                Ok(()) => debug!("Sent SIGKILL to process group {}", pid),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
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
    impl ProcessHandle for UnixProcessHandle {
        /// PID assigned at spawn time
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
            self.kill_group();
            self.child_mut()
                .start_kill()
                .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
        }

        fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
            let child = self.child_mut();
            (child.stdout.take(), child.stderr.take())
        }
    }

    impl Drop for UnixProcessHandle {
        fn drop(&mut self) {
            // Still running means the group id is certainly ours
            if matches!(self.child_mut().try_wait(), Ok(None)) {
                self.kill_group();
            }
        }
    }

    /// Unix-specific process manager with process tree cleanup
    pub struct UnixProcessManager {
        system: Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            <Self as ProcessManager>::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn_process(&self, request: &LaunchRequest) -> std::io::Result<UnixProcessHandle> {
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

            // Own process group so the driver and whatever it launches can be signalled together
            cmd.process_group(0);
            cmd.kill_on_drop(true);

            let child = cmd.spawn()?;

            if let Some(pid) = child.id() {
                info!(
                    pid,
                    command = %request.program.display(),
                    args = ?request.args,
                    "Spawned Unix process"
                );
            }

            Ok(UnixProcessHandle::new(child))
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut UnixProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match signal::kill(NixPid::from_raw(pid.0 as i32), Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process {}", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        async fn force_kill(&self, handle: &mut UnixProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            // Descendants first, they would otherwise be reparented and outlive the driver
            match self.find_child_processes(pid).await {
                Ok(children) => {
                    for child_pid in children {
                        Self::kill_pid(child_pid);
                    }
                }
                Err(e) => warn!("Failed to enumerate children of {}: {}", pid, e),
            }

            handle.kill_group();

            match handle.kill().await {
                Ok(()) => {
                    info!("Killed process {}", pid);
                    TerminationResult::Success
                }
                Err(e) => match handle.try_wait() {
                    Ok(Some(_)) => TerminationResult::ProcessNotFound,
                    _ => {
                        warn!("Failed to kill process {}: {}", pid, e);
                        TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                    }
                },
            }
        }

        async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            Ok(children.into_iter().map(ProcessId::from).collect())
        }
    }

    impl UnixProcessManager {
        fn kill_pid(pid: ProcessId) {
            match signal::kill(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL) {
                Ok(()) => debug!("Sent SIGKILL to descendant {}", pid),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill descendant {}: {}", pid, e),
            }
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

    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            info!("Initializing Unix process manager");
            Self {
                system: Mutex::new(System::new()),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use driver_service_core::{
            CommandLineBuilder, ProcessLauncher, ServiceConfig, ServiceStdErr, ServiceStdOut,
        };
        use std::path::{Path, PathBuf};
        use std::pin::Pin;
        use std::sync::Arc;
        use std::task::{Context, Poll};
        use std::time::Duration;
        use tokio::io::AsyncWrite;

        fn request(program: &str, args: &[&str]) -> LaunchRequest {
            LaunchRequest {
                program: PathBuf::from(program),
                args: args.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_spawn_and_wait() {
            let manager = UnixProcessManager::default();
            let mut handle = manager
                .spawn_process(&request("/bin/sh", &["-c", "exit 3"]))
                .await
                .unwrap();

            assert!(handle.get_pid().is_some());
            let status = manager
                .wait_for_exit(&mut handle, Some(Duration::from_secs(5)))
                .await
                .unwrap();
            match status {
                ProcessStatus::Exited(status) => assert_eq!(status.code(), Some(3)),
                other => panic!("unexpected status: {other:?}"),
            }
            assert!(!handle.is_running());
        }

        #[tokio::test]
        async fn test_spawn_missing_program() {
            let manager = UnixProcessManager::default();
            let result = manager
                .spawn_process(&request("/definitely/not/a/driver", &[]))
                .await;
            assert_eq!(result.err().map(|e| e.kind()), Some(std::io::ErrorKind::NotFound));
        }

        #[tokio::test]
        async fn test_graceful_shutdown() {
            let manager = UnixProcessManager::default();
            let mut handle = manager
                .spawn_process(&request("/bin/sleep", &["30"]))
                .await
                .unwrap();
            assert!(handle.is_running());

            let result = manager.shutdown(&mut handle, Duration::from_secs(2)).await;
            assert_eq!(result, TerminationResult::Success);
            assert!(!handle.is_running());
        }

        #[tokio::test]
        async fn test_shutdown_escalates_to_kill() {
            let manager = UnixProcessManager::default();
            let mut handle = manager
                .spawn_process(&request("/bin/sh", &["-c", "trap '' TERM; sleep 30 & wait"]))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;

            let result = manager.shutdown(&mut handle, Duration::from_millis(300)).await;
            assert!(result.is_gone());
            assert!(!handle.is_running());
        }

        #[tokio::test]
        async fn test_shutdown_of_exited_process() {
            let manager = UnixProcessManager::default();
            let mut handle = manager
                .spawn_process(&request("/bin/sh", &["-c", "exit 0"]))
                .await
                .unwrap();
            manager.wait_for_exit(&mut handle, None).await.unwrap();

            let result = manager.shutdown(&mut handle, Duration::from_secs(1)).await;
            assert_eq!(result, TerminationResult::ProcessNotFound);
        }

        fn assert_all_gone(pids: Vec<ProcessId>) {
            let mut system = System::new();
            system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
            for pid in pids {
                let alive = system
                    .process(sysinfo::Pid::from_u32(pid.0))
                    .is_some_and(|p| p.status() != sysinfo::ProcessStatus::Zombie);
                assert!(!alive, "descendant {pid} survived");
            }
        }

        async fn spawn_with_child(manager: &UnixProcessManager) -> (UnixProcessHandle, Vec<ProcessId>) {
            let handle = manager
                .spawn_process(&request("/bin/sh", &["-c", "sleep 30 & wait"]))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;

            let pid = handle.get_pid().unwrap();
            let children = manager.find_child_processes(pid).await.unwrap();
            assert!(!children.is_empty());
            (handle, children)
        }

        #[tokio::test]
        async fn test_find_child_processes() {
            let manager = UnixProcessManager::default();
            let (mut handle, children) = spawn_with_child(&manager).await;

            assert!(manager.force_kill(&mut handle).await.is_gone());
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_all_gone(children);
        }

        #[tokio::test]
        async fn test_start_kill_takes_descendants() {
            let manager = UnixProcessManager::default();
            let (mut handle, children) = spawn_with_child(&manager).await;

            handle.start_kill().unwrap();
            manager
                .wait_for_exit(&mut handle, Some(Duration::from_secs(2)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_all_gone(children);
        }

        #[tokio::test]
        async fn test_dropped_handle_takes_descendants() {
            let manager = UnixProcessManager::default();
            let (handle, children) = spawn_with_child(&manager).await;

            drop(handle);
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert_all_gone(children);
        }

        #[derive(Clone, Default)]
        struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

        impl Captured {
            fn text(&self) -> String {
                String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
            }
        }

        impl AsyncWrite for Captured {
            fn poll_write(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<std::io::Result<usize>> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }

            fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
                Poll::Ready(Ok(()))
            }

            fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
                Poll::Ready(Ok(()))
            }
        }

        #[tokio::test]
        async fn test_invalid_utf8_output_does_not_kill_driver() {
            let manager = Arc::new(UnixProcessManager::default());
            let captured = Captured::default();
            let launcher = ProcessLauncher::new(
                manager.clone(),
                &ServiceConfig::default(),
                ServiceStdOut::new(Box::new(captured.clone())),
                ServiceStdErr::inherit(),
            );
            let command_line = CommandLineBuilder::new([
                "-c",
                "printf '\\377\\n'; sleep 0.3; echo again; sleep 5",
            ])
            .build();

            let mut handle = launcher
                .launch(Path::new("/bin/sh"), &command_line)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;

            assert!(matches!(handle.try_wait(), Ok(None)));
            assert_eq!(captured.text(), "\u{FFFD}\nagain\n");
            assert!(manager.force_kill(&mut handle).await.is_gone());
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Placeholders so the facade's platform selection compiles everywhere
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;
