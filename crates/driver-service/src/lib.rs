//! Launch, health-check and stop a local driver service
//!
//! ```no_run
//! use driver_service::{DriverService, ServiceConfig};
//!
//! # async fn run() -> Result<(), driver_service::ServiceError> {
//! let config = ServiceConfig::builder()
//!     .executable_path("/usr/local/bin")
//!     .executable_file_name("msedgedriver")
//!     .download_url("https://developer.microsoft.com/microsoft-edge/tools/webdriver/")
//!     .named_option("package", Some("Microsoft.MicrosoftEdge_8wekyb3d8bbwe!MicrosoftEdge"))
//!     .build()?;
//!
//! let service = DriverService::new(config)?;
//! service.start().await?;
//! println!("driver listening at {:?}", service.service_url().await);
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

mod factory;

pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory};

use driver_service_core::ProcessManagerFactory;
use std::sync::Arc;
use tracing::debug;

/// Platform-selected supervisor for one driver process
pub struct DriverService {
    inner: ServiceSupervisor<PlatformProcessManager>,
}

impl DriverService {
    /// Create a service whose driver output goes to the caller's streams,
    /// or to `log_path` when configured
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let manager = Self::manager();
        Ok(Self {
            inner: ServiceSupervisor::new(config, manager)?,
        })
    }

    pub fn new_with_sinks(
        config: ServiceConfig,
        out: ServiceStdOut,
        err: ServiceStdErr,
    ) -> Result<Self, ServiceError> {
        let manager = Self::manager();
        Ok(Self {
            inner: ServiceSupervisor::new_with_sinks(config, manager, out, err)?,
        })
    }

    fn manager() -> Arc<PlatformProcessManager> {
        debug!(
            platform = PlatformProcessManagerFactory::platform_name(),
            "Creating process manager"
        );
        Arc::new(PlatformProcessManagerFactory::create_process_manager())
    }

    /// Start the driver and wait for it to answer on its status endpoint
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.inner.start().await
    }

    /// Stop the driver; does nothing when it is not running
    pub async fn stop(&self) -> Result<(), ServiceError> {
        self.inner.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.inner.is_running().await
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.state().await
    }

    pub async fn port(&self) -> Option<u16> {
        self.inner.port().await
    }

    pub async fn service_url(&self) -> Option<String> {
        self.inner.service_url().await
    }

    pub fn config(&self) -> &ServiceConfig {
        self.inner.config()
    }
}

// Re-export core functionality
pub use driver_service_core::*;
