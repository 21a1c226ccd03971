use crate::command_line::CommandLine;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::process::{LaunchRequest, ProcessHandle, ProcessManager};
use crate::stdio::{self, ServiceStdErr, ServiceStdOut};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Starts the driver executable and wires its output to the configured sinks
pub struct ProcessLauncher<M> {
    manager: Arc<M>,
    download_url: String,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    hide_window: bool,
    out: ServiceStdOut,
    err: ServiceStdErr,
}

impl<M: ProcessManager> ProcessLauncher<M> {
    pub fn new(
        manager: Arc<M>,
        config: &ServiceConfig,
        out: ServiceStdOut,
        err: ServiceStdErr,
    ) -> Self {
        Self {
            manager,
            download_url: config.download_url.clone(),
            working_dir: config.working_directory.clone(),
            env: config.env.clone(),
            hide_window: config.hide_command_window,
            out,
            err,
        }
    }

    /// Launch `executable` with the composed command line
    ///
    /// Fails with `ExecutableNotFound` when the path is not an existing file and with
    /// `LaunchFailed` for any other spawn error.
    pub async fn launch(
        &self,
        executable: &Path,
        command_line: &CommandLine,
    ) -> Result<M::Handle, ServiceError> {
        let is_file = tokio::fs::metadata(executable)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(self.not_found(executable));
        }

        let request = LaunchRequest {
            program: executable.to_path_buf(),
            args: command_line.args().to_vec(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            capture_output: true,
            hide_window: self.hide_window,
        };

        let mut handle = match self.manager.spawn_process(&request).await {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.not_found(executable));
            }
            Err(e) => {
                return Err(ServiceError::LaunchFailed(format!(
                    "{}: {e}",
                    executable.display()
                )));
            }
        };

        info!(
            pid = ?handle.get_pid(),
            executable = %executable.display(),
            command_line = %command_line,
            "Launched driver service"
        );

        let (stdout, stderr) = handle.take_output();
        if let Some(stdout) = stdout {
            let out = self.out.clone();
            tokio::spawn(async move {
                if let Err(e) = stdio::stream(stdout, out).await {
                    debug!(error = %e, "Driver stdout forwarding stopped");
                }
            });
        }
        if let Some(stderr) = stderr {
            let err = self.err.clone();
            tokio::spawn(async move {
                if let Err(e) = stdio::stream(stderr, err).await {
                    debug!(error = %e, "Driver stderr forwarding stopped");
                }
            });
        }

        Ok(handle)
    }

    fn not_found(&self, executable: &Path) -> ServiceError {
        ServiceError::ExecutableNotFound {
            path: executable.to_path_buf(),
            download_url: self.download_url.clone(),
        }
    }
}
