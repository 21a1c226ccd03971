use crate::error::ServiceError;
use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

/// Finds unused local TCP ports for drivers configured with port 0
///
/// The probe socket is released before returning so the driver can bind the
/// port itself. Another process may grab the port in between; that race is
/// surfaced as a failed start rather than retried here.
pub struct PortAllocator;

impl PortAllocator {
    /// Let the OS pick a free loopback port and hand it back unbound
    pub fn find_free_port() -> Result<u16, ServiceError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(ServiceError::NoPortAvailable)?;

        let port = listener
            .local_addr()
            .map_err(ServiceError::NoPortAvailable)?
            .port();

        drop(listener);
        debug!(port, "Allocated free local port");
        Ok(port)
    }
}
