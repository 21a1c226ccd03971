//! Test doubles shared by the unit tests of this crate

use crate::config::{ReadinessConfig, ServiceConfig, ShutdownConfig};
use crate::process::{
    LaunchRequest, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, TerminationResult,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{ChildStderr, ChildStdout};

/// A config pointing at the running test binary, which certainly exists
pub(crate) fn test_config(port: u16) -> ServiceConfig {
    let exe = std::env::current_exe().unwrap();
    ServiceConfig {
        executable_path: exe.parent().unwrap().to_path_buf(),
        executable_file_name: exe.file_name().unwrap().to_string_lossy().into_owned(),
        port,
        readiness: ReadinessConfig {
            poll_interval_ms: 50,
            timeout_ms: 2_000,
            ..Default::default()
        },
        shutdown: ShutdownConfig {
            grace_period_ms: 500,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Serve every request on a fresh loopback port with the given status
pub(crate) async fn http_responder(status: u16) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reason = if status == 200 { "OK" } else { "Service Unavailable" };
    let response =
        format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    port
}

pub(crate) struct FakeHandle {
    alive: Arc<AtomicBool>,
}

impl FakeHandle {
    pub(crate) fn alive() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn exited() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(ProcessId(4242))
    }

    fn try_wait(&self) -> Result<Option<ProcessStatus>> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Ok(Some(ProcessStatus::Terminated))
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        while self.alive.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(ProcessStatus::Terminated)
    }

    async fn kill(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start_kill(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (None, None)
    }
}

/// Records launches and hands out handles sharing one liveness flag
#[derive(Default)]
pub(crate) struct FakeManager {
    pub(crate) alive: Arc<AtomicBool>,
    pub(crate) exit_on_spawn: AtomicBool,
    /// The driver shrugs off every termination attempt
    pub(crate) unkillable: AtomicBool,
    pub(crate) kill_attempts: AtomicUsize,
    requests: Mutex<Vec<LaunchRequest>>,
}

impl FakeManager {
    pub(crate) fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLifecycle for FakeManager {
    type Handle = FakeHandle;

    async fn spawn_process(&self, request: &LaunchRequest) -> std::io::Result<FakeHandle> {
        self.requests.lock().unwrap().push(request.clone());
        self.alive
            .store(!self.exit_on_spawn.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(FakeHandle {
            alive: self.alive.clone(),
        })
    }
}

#[async_trait]
impl ProcessTermination for FakeManager {
    async fn terminate_gracefully(&self, handle: &mut FakeHandle) -> TerminationResult {
        if self.unkillable.load(Ordering::SeqCst) {
            return TerminationResult::AccessDenied;
        }
        handle.alive.store(false, Ordering::SeqCst);
        TerminationResult::Success
    }

    async fn force_kill(&self, handle: &mut FakeHandle) -> TerminationResult {
        self.kill_attempts.fetch_add(1, Ordering::SeqCst);
        if self.unkillable.load(Ordering::SeqCst) {
            return TerminationResult::Failed("operation not permitted".to_string());
        }
        handle.alive.store(false, Ordering::SeqCst);
        TerminationResult::Success
    }

    async fn find_child_processes(&self, _pid: ProcessId) -> Result<Vec<ProcessId>> {
        Ok(Vec::new())
    }
}

impl ProcessManager for FakeManager {
    fn new() -> Self {
        Self::default()
    }
}
