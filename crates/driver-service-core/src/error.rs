use crate::state::ServiceState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error types for driver service supervision
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(
        "The file {} does not exist. The driver can be downloaded at {download_url}",
        path.display()
    )]
    ExecutableNotFound { path: PathBuf, download_url: String },

    #[error("No free local port available: {0}")]
    NoPortAvailable(#[source] std::io::Error),

    #[error("Failed to launch driver service: {0}")]
    LaunchFailed(String),

    #[error("Driver service exited before it became ready: {0}")]
    ProcessExitedPrematurely(String),

    #[error("Driver service was not ready after {0:?}")]
    TimedOut(Duration),

    #[error("Driver service has already been started")]
    AlreadyStarted,

    #[error("Failed to stop driver service: {0}")]
    StopFailed(String),

    #[error("Driver service instance cannot be started again (state: {0})")]
    NotRestartable(ServiceState),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Check if a fresh supervisor instance may succeed where this one failed
    ///
    /// Covers the accepted race between releasing a probed port and the helper
    /// binding it, which surfaces as a launch failure or an early exit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::LaunchFailed(_)
                | ServiceError::ProcessExitedPrematurely(_)
                | ServiceError::TimedOut(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ServiceError::ExecutableNotFound { .. }
                | ServiceError::Configuration(_)
                | ServiceError::NotRestartable(_)
        )
    }
}
