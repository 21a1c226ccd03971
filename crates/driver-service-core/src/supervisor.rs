use crate::command_line::CommandLineBuilder;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::launcher::ProcessLauncher;
use crate::port::PortAllocator;
use crate::process::{ProcessHandle, ProcessManager};
use crate::readiness::ReadinessPoller;
use crate::state::ServiceState;
use crate::stdio::{self, ServiceStdErr, ServiceStdOut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// How long a killed driver is given to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

const LOOPBACK: &str = "127.0.0.1";

struct SupervisorInner<H> {
    state: ServiceState,
    port: Option<u16>,
    handle: Option<H>,
}

impl<H: ProcessHandle> SupervisorInner<H> {
    /// Notice a driver that died on its own since the last look
    fn refresh(&mut self) {
        if self.state != ServiceState::Running {
            return;
        }

        let alive = self.handle.as_ref().is_some_and(|h| h.is_running());
        if !alive {
            warn!(port = ?self.port, "Driver service exited unexpectedly");
            self.handle = None;
            self.state = ServiceState::Failed;
        }
    }
}

/// Marks the instance `Failed` unless the start attempt reaches `Running`
///
/// Also covers a caller dropping the `start` future mid-way; the launched child
/// is killed by its own drop in that case.
struct StartAttempt<'a, H> {
    inner: &'a mut SupervisorInner<H>,
    committed: bool,
}

impl<'a, H> StartAttempt<'a, H> {
    fn begin(inner: &'a mut SupervisorInner<H>) -> Self {
        inner.state = ServiceState::Starting;
        Self {
            inner,
            committed: false,
        }
    }

    fn running(mut self, handle: H) {
        self.inner.handle = Some(handle);
        self.inner.state = ServiceState::Running;
        self.committed = true;
    }
}

impl<H> Drop for StartAttempt<'_, H> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.state = ServiceState::Failed;
        }
    }
}

/// Owns one driver process from launch to shutdown
///
/// `start` and `stop` are serialized on an internal lock. An instance runs its
/// driver at most once; once `Stopped` or `Failed` a new supervisor is needed.
pub struct ServiceSupervisor<M: ProcessManager> {
    config: ServiceConfig,
    manager: Arc<M>,
    launcher: ProcessLauncher<M>,
    poller: ReadinessPoller,
    inner: Mutex<SupervisorInner<M::Handle>>,
}

impl<M: ProcessManager> ServiceSupervisor<M> {
    /// Create a supervisor whose driver writes to the caller's stdout/stderr,
    /// or to `log_path` when one is configured
    pub fn new(config: ServiceConfig, manager: Arc<M>) -> Result<Self, ServiceError> {
        let (out, err) = match &config.log_path {
            Some(path) => stdio::file_sinks(path).map_err(|e| {
                ServiceError::Configuration(format!(
                    "Cannot open driver log {}: {e}",
                    path.display()
                ))
            })?,
            None => (ServiceStdOut::inherit(), ServiceStdErr::inherit()),
        };
        Self::new_with_sinks(config, manager, out, err)
    }

    pub fn new_with_sinks(
        config: ServiceConfig,
        manager: Arc<M>,
        out: ServiceStdOut,
        err: ServiceStdErr,
    ) -> Result<Self, ServiceError> {
        // Validate at construction time
        config.validate()?;

        let launcher = ProcessLauncher::new(manager.clone(), &config, out, err);
        let poller = ReadinessPoller::new(config.readiness.poll_interval())?;

        Ok(Self {
            config,
            manager,
            launcher,
            poller,
            inner: Mutex::new(SupervisorInner {
                state: ServiceState::NotStarted,
                port: None,
                handle: None,
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Launch the driver and wait until its status endpoint answers
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock().await;
        inner.refresh();

        match inner.state {
            ServiceState::NotStarted => {}
            ServiceState::Starting | ServiceState::Running | ServiceState::Stopping => {
                return Err(ServiceError::AlreadyStarted);
            }
            state => return Err(ServiceError::NotRestartable(state)),
        }

        let mut attempt = StartAttempt::begin(&mut *inner);

        let port = match self.config.port {
            0 => PortAllocator::find_free_port()?,
            port => port,
        };
        attempt.inner.port = Some(port);
        info!(port, "Starting driver service");

        let command_line = CommandLineBuilder::new(self.config.base_args(port))
            .named_options(&self.config.named_options)
            .build();

        let mut handle = self
            .launcher
            .launch(&self.config.executable(), &command_line)
            .await?;

        let url = status_url(port, &self.config.readiness.status_path);
        let ready = self
            .poller
            .wait_until_ready(&url, self.config.readiness.timeout(), &handle)
            .await;

        if let Err(e) = ready {
            error!(port, error = %e, "Driver service failed to start");
            self.discard(&mut handle).await;
            return Err(e);
        }

        attempt.running(handle);
        info!(port, "Driver service is running");
        Ok(())
    }

    /// Stop the driver: optional shutdown request, SIGTERM, bounded wait, then kill
    ///
    /// Stopping an instance that never started, or has already ended, does nothing.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock().await;
        inner.refresh();

        match inner.state {
            ServiceState::Running | ServiceState::Stopping => {}
            ServiceState::NotStarted | ServiceState::Stopped | ServiceState::Failed => {
                return Ok(());
            }
            ServiceState::Starting => return Err(ServiceError::AlreadyStarted),
        }

        inner.state = ServiceState::Stopping;
        let Some(mut handle) = inner.handle.take() else {
            inner.state = ServiceState::Stopped;
            return Ok(());
        };
        info!(pid = ?handle.get_pid(), port = ?inner.port, "Stopping driver service");

        let grace = self.config.shutdown.grace_period();
        if let (Some(path), Some(port)) = (&self.config.shutdown.shutdown_path, inner.port) {
            let url = format!("http://{LOOPBACK}:{port}{path}");
            if self.poller.request(&url).await {
                let _ = self.manager.wait_for_exit(&mut handle, Some(grace)).await;
            }
        }

        let result = self.manager.shutdown(&mut handle, grace).await;
        if !result.is_gone() {
            error!(result = ?result, "Driver service could not be stopped");
            inner.state = ServiceState::Failed;
            return Err(ServiceError::StopFailed(format!("{result:?}")));
        }

        if let Err(e) = self.manager.wait_for_exit(&mut handle, Some(REAP_TIMEOUT)).await {
            warn!(error = %e, "Driver service was not reaped");
        }
        inner.state = ServiceState::Stopped;
        info!("Driver service stopped");
        Ok(())
    }

    /// Whether the driver is running, noticing an unexpected exit
    pub async fn is_running(&self) -> bool {
        self.state().await == ServiceState::Running
    }

    pub async fn state(&self) -> ServiceState {
        let mut inner = self.inner.lock().await;
        inner.refresh();
        inner.state
    }

    /// Port the driver was told to listen on, once resolved
    pub async fn port(&self) -> Option<u16> {
        self.inner.lock().await.port
    }

    /// Base URL of the driver's HTTP endpoint, once a port is resolved
    pub async fn service_url(&self) -> Option<String> {
        self.port()
            .await
            .map(|port| format!("http://{LOOPBACK}:{port}/"))
    }

    async fn discard(&self, handle: &mut M::Handle) {
        match self.manager.force_kill(handle).await {
            result if result.is_gone() => {}
            result => warn!(result = ?result, "Failed to kill driver after failed start"),
        }
        if let Err(e) = self.manager.wait_for_exit(handle, Some(REAP_TIMEOUT)).await {
            warn!(error = %e, "Driver was not reaped after failed start");
        }
    }
}

impl<M: ProcessManager> Drop for ServiceSupervisor<M> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(handle) = inner.handle.as_mut()
            && handle.is_running()
        {
            warn!(
                pid = ?handle.get_pid(),
                "Supervisor dropped with a running driver - killing it"
            );
            if let Err(e) = handle.start_kill() {
                error!(error = %e, "Emergency kill of driver failed");
            }
        }
    }
}

fn status_url(port: u16, status_path: &str) -> String {
    format!("http://{LOOPBACK}:{port}{status_path}")
}
