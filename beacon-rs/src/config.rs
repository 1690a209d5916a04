//! Discovery configuration: etcd endpoints, key layout, connection timings. Loaded from JSON.

use std::path::Path;
use std::time::Duration;

use beacon_core::{service_prefix, CoreError, DEFAULT_KEY_ROOT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Invalid(err.to_string())
    }
}

/// Where and how to reach the coordination store. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// etcd endpoints, e.g. `["10.0.0.5:2379"]`.
    pub endpoints: Vec<String>,
    /// First key segment; registrations live under `<key_root>/<service>/`.
    pub key_root: String,
    pub connect_timeout_ms: u64,
    /// Per-request deadline, bounding the bootstrap read.
    pub request_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub keep_alive_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            key_root: DEFAULT_KEY_ROOT.to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            keep_alive_interval_ms: 30_000,
            keep_alive_timeout_ms: 10_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_endpoints<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() || self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid("endpoints must be non-empty".into()));
        }
        let root = self.key_root.trim_matches('/');
        if root.is_empty() || root.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "key_root must be a single path segment, got {:?}",
                self.key_root
            )));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Key prefix watched for `service`, e.g. `register/orders/`.
    pub fn prefix_for(&self, service: &str) -> String {
        service_prefix(&self.key_root, service)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = DiscoveryConfig::from_json_str(r#"{"endpoints":["etcd-0:2379"]}"#).unwrap();
        assert_eq!(config.endpoints, vec!["etcd-0:2379"]);
        assert_eq!(config.key_root, "register");
        assert_eq!(config.prefix_for("orders"), "register/orders/");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            DiscoveryConfig::from_json_str(r#"{"endpoints":[]}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DiscoveryConfig::from_json_str(r#"{"key_root":"a/b"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DiscoveryConfig::from_json_str(r#"{"request_timeout_ms":0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DiscoveryConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn config_errors_surface_as_invalid() {
        let err: CoreError = DiscoveryConfig::from_json_str(r#"{"endpoints":[]}"#)
            .unwrap_err()
            .into();
        assert!(matches!(err, CoreError::Invalid(msg) if msg.contains("endpoints")));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            DiscoveryConfig::from_file("/nonexistent/beacon.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn custom_root() {
        let config = DiscoveryConfig {
            key_root: "/services/".into(),
            ..DiscoveryConfig::with_endpoints(["a:2379", "b:2379"])
        };
        config.validate().unwrap();
        assert_eq!(config.prefix_for("pay"), "services/pay/");
    }
}
