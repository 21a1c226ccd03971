//! Driver service core - platform-independent supervision of a local helper process
//!
//! This crate provides the configuration, error taxonomy, process traits and the
//! generic [`ServiceSupervisor`] that platform-specific crates plug into.

mod command_line;
mod config;
mod error;
mod launcher;
mod port;
mod process;
mod readiness;
mod state;
mod stdio;
mod supervisor;
#[cfg(test)]
mod testing;

pub use command_line::{CommandLine, CommandLineBuilder};
pub use config::*;
pub use error::*;
pub use launcher::ProcessLauncher;
pub use port::PortAllocator;
pub use process::*;
pub use readiness::ReadinessPoller;
pub use state::ServiceState;
pub use stdio::{ServiceStdErr, ServiceStdOut, ServiceStdio};
pub use supervisor::ServiceSupervisor;
