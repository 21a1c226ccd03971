use crate::error::ServiceError;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the readiness probe issued against a freshly launched driver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessConfig {
    /// Path of the status endpoint, relative to the service URL
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Delay between two consecutive probes (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total time the driver is given to become ready (in milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            status_path: default_status_path(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ReadinessConfig {
    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("poll_interval_ms must be greater than 0"));
        }

        if self.poll_interval_ms > self.timeout_ms {
            return Err(anyhow::anyhow!(
                "poll_interval_ms cannot be greater than timeout_ms"
            ));
        }

        if self.timeout_ms > 300_000 {
            return Err(anyhow::anyhow!("timeout_ms should not exceed 5 minutes"));
        }

        if !self.status_path.starts_with('/') {
            return Err(anyhow::anyhow!("status_path must start with '/'"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for stopping a running driver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownConfig {
    /// How long the driver may take to exit after the graceful request (in milliseconds)
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Optional HTTP endpoint asked to shut the driver down before it is signalled
    #[serde(default)]
    pub shutdown_path: Option<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            shutdown_path: None,
        }
    }
}

impl ShutdownConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grace_period_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "grace_period_ms should not exceed 60 seconds"
            ));
        }

        if let Some(path) = &self.shutdown_path
            && !path.starts_with('/')
        {
            return Err(anyhow::anyhow!("shutdown_path must start with '/'"));
        }

        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// A caller-supplied flag rendered as `--<name>=<value>`; unset values render nothing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl NamedOption {
    pub fn new(name: impl ToString, value: Option<impl ToString>) -> Self {
        Self {
            name: name.to_string(),
            value: value.map(|v| v.to_string()),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("named option must have a name"));
        }
        if self.name.starts_with('-') {
            return Err(anyhow::anyhow!(
                "named option '{}' must not carry its own dashes",
                self.name
            ));
        }
        if self.name.contains('=') || self.name.chars().any(char::is_whitespace) {
            return Err(anyhow::anyhow!(
                "named option '{}' contains '=' or whitespace",
                self.name
            ));
        }
        Ok(())
    }
}

/// Immutable description of the driver executable and how it is invoked
#[derive(Default, Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option))]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Directory containing the driver executable
    pub executable_path: PathBuf,
    pub executable_file_name: String,
    /// Port the driver listens on, 0 picks a free one at start
    #[builder(default)]
    pub port: u16,
    #[builder(default)]
    #[builder(setter(custom))]
    pub named_options: Vec<NamedOption>,
    /// Where the driver can be downloaded, only shown in error messages
    #[builder(default)]
    pub download_url: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub extra_args: Vec<String>,
    #[builder(default)]
    pub log_level: Option<String>,
    /// Suppress the driver's initial diagnostic banner
    #[builder(default)]
    pub silent: bool,
    /// Windows only: launch without a console window
    #[builder(default)]
    pub hide_command_window: bool,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    /// Append driver stdout/stderr to this file instead of the caller's streams
    #[builder(default)]
    pub log_path: Option<PathBuf>,
    #[builder(default)]
    pub readiness: ReadinessConfig,
    #[builder(default)]
    pub shutdown: ShutdownConfig,
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Full path of the driver executable
    pub fn executable(&self) -> PathBuf {
        self.executable_path.join(&self.executable_file_name)
    }

    /// Arguments every launch carries, ahead of any named option
    pub fn base_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![format!("--port={port}")];
        if let Some(level) = &self.log_level {
            args.push(format!("--log-level={level}"));
        }
        if self.silent {
            args.push("--silent".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.executable_file_name.is_empty() {
            return Err(ServiceError::Configuration(
                "executable_file_name must not be empty".to_string(),
            ));
        }

        for option in &self.named_options {
            option
                .validate()
                .map_err(|e| ServiceError::Configuration(e.to_string()))?;
        }

        self.readiness
            .validate()
            .map_err(|e| ServiceError::Configuration(format!("Invalid readiness config: {e}")))?;
        self.shutdown
            .validate()
            .map_err(|e| ServiceError::Configuration(format!("Invalid shutdown config: {e}")))?;

        Ok(())
    }
}

impl ServiceConfigBuilder {
    /// Add a named option; setting the same name again replaces its value in place
    pub fn named_option<N: ToString, V: ToString>(&mut self, name: N, value: Option<V>) -> &mut Self {
        let options = self.named_options.get_or_insert_with(Vec::new);
        let option = NamedOption::new(name, value);
        match options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => existing.value = option.value,
            None => options.push(option),
        }
        self
    }

    pub fn extra_args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.extra_args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }
}

impl From<ServiceConfigBuilderError> for ServiceError {
    fn from(e: ServiceConfigBuilderError) -> Self {
        ServiceError::Configuration(e.to_string())
    }
}

// Default value functions for serde
fn default_status_path() -> String {
    "/status".to_string()
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_timeout_ms() -> u64 {
    20_000
}
fn default_grace_period_ms() -> u64 {
    3_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_config() -> ServiceConfig {
        ServiceConfig::builder()
            .executable_path("/opt/drivers")
            .executable_file_name("MicrosoftWebDriver.exe")
            .download_url("http://go.microsoft.com/fwlink/?LinkId=619687")
            .named_option("package", Some("Microsoft.App_8wekyb3d8bbwe!App"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_readiness_config() {
        let config = ReadinessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.status_path, "/status");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_readiness_config() {
        let mut config = ReadinessConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.poll_interval_ms = 5_000;
        config.timeout_ms = 1_000;
        assert!(config.validate().is_err());

        config.poll_interval_ms = 100;
        config.status_path = "status".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_shutdown_config() {
        let config = ShutdownConfig {
            shutdown_path: Some("shutdown".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = edge_config();
        assert_eq!(config.port, 0);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.executable(),
            PathBuf::from("/opt/drivers/MicrosoftWebDriver.exe")
        );
        assert_eq!(config.shutdown, ShutdownConfig::default());
    }

    #[test]
    fn test_named_option_replaces_in_place() {
        let config = ServiceConfig::builder()
            .executable_path("/opt/drivers")
            .executable_file_name("driver")
            .named_option("package", Some("first"))
            .named_option("host", Some("localhost"))
            .named_option("package", Some("second"))
            .build()
            .unwrap();

        let names: Vec<_> = config.named_options.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["package", "host"]);
        assert_eq!(config.named_options[0].value.as_deref(), Some("second"));
    }

    #[test]
    fn test_base_args() {
        let config = ServiceConfig::builder()
            .executable_path("/opt/drivers")
            .executable_file_name("driver")
            .log_level("DEBUG")
            .silent(true)
            .extra_args(["--whitelisted-ips="])
            .build()
            .unwrap();

        assert_eq!(
            config.base_args(9515),
            vec!["--port=9515", "--log-level=DEBUG", "--silent", "--whitelisted-ips="]
        );
    }

    #[test]
    fn test_malformed_option_names_are_rejected() {
        for name in ["", "--package", "pack age", "a=b"] {
            let config = ServiceConfig::builder()
                .executable_path("/opt/drivers")
                .executable_file_name("driver")
                .named_option(name, Some("x"))
                .build()
                .unwrap();
            assert!(
                matches!(config.validate(), Err(ServiceError::Configuration(_))),
                "name {name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_file_name_is_rejected() {
        let config = ServiceConfig {
            executable_path: PathBuf::from("/opt/drivers"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServiceError::Configuration(_))
        ));
    }

    #[test]
    fn test_serialization() {
        let config = edge_config();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("executableFileName"));
        let deserialized: ServiceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"executablePath": "/usr/bin", "executableFileName": "chromedriver"}"#;
        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.readiness, ReadinessConfig::default());
        assert!(config.validate().is_ok());
    }
}
