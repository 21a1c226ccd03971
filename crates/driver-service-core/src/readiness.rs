use crate::error::ServiceError;
use crate::process::ProcessHandle;
use backon::{ConstantBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for a single status request
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

enum ProbeError {
    /// Nothing answered yet, or not with a success status
    NotReady(String),
    /// The driver process is gone
    Exited(String),
}

/// Polls the driver's status endpoint until it answers or the driver dies
pub struct ReadinessPoller {
    client: reqwest::Client,
    poll_interval: Duration,
}

impl ReadinessPoller {
    pub fn new(poll_interval: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| ServiceError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            poll_interval,
        })
    }

    /// Wait until a GET on `url` succeeds
    ///
    /// Connection failures and non-success statuses only mean "not ready yet". The
    /// wait ends with `ProcessExitedPrematurely` as soon as `handle` has exited, and
    /// with `TimedOut` once `timeout` has elapsed.
    pub async fn wait_until_ready<H: ProcessHandle + ?Sized>(
        &self,
        url: &str,
        timeout: Duration,
        handle: &H,
    ) -> Result<(), ServiceError> {
        info!(
            url = %url,
            "Polling driver readiness (every {:?}, timeout {:?})",
            self.poll_interval, timeout
        );

        let attempts = (timeout.as_millis() / self.poll_interval.as_millis().max(1)) as usize + 1;
        let strategy = ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .with_max_times(attempts);

        let poll = (move || self.probe(url, handle))
            .retry(strategy)
            .when(|e: &ProbeError| matches!(e, ProbeError::NotReady(_)))
            .notify(|e: &ProbeError, after: Duration| {
                if let ProbeError::NotReady(reason) = e {
                    debug!(reason = %reason, "Driver not ready, probing again in {after:?}");
                }
            });

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(())) => {
                info!(url = %url, "Driver service is ready");
                Ok(())
            }
            Ok(Err(ProbeError::Exited(status))) => {
                Err(ServiceError::ProcessExitedPrematurely(status))
            }
            Ok(Err(ProbeError::NotReady(reason))) => {
                warn!(url = %url, reason = %reason, "Driver service never became ready");
                Err(ServiceError::TimedOut(timeout))
            }
            Err(_) => Err(ServiceError::TimedOut(timeout)),
        }
    }

    /// Fire a single GET, reporting whether it succeeded
    pub async fn request(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "Request to driver failed");
                false
            }
        }
    }

    async fn probe<H: ProcessHandle + ?Sized>(&self, url: &str, handle: &H) -> Result<(), ProbeError> {
        match handle.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => return Err(ProbeError::Exited(status.to_string())),
            Err(e) => return Err(ProbeError::Exited(e.to_string())),
        }

        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(ProbeError::NotReady(format!(
                "status {}",
                response.status()
            ))),
            Err(e) => Err(ProbeError::NotReady(e.to_string())),
        }
    }
}
