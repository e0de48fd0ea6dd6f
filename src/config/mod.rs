//! Configuration module
//!
//! Values consumed by the adapter core, loaded from a file and overridden by
//! environment variables and command-line flags.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{find_config_file, load_default};

use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::builder::DEFAULT_MAX_DEPTH;

/// Fatal configuration problems, reported before any event is processed
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How results are attached to a test run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterMode {
    /// Report only tests that belong to an existing run
    #[default]
    Filtered,
    /// Report every test into an existing run
    RunAll,
    /// Create a new run and report every test into it
    NewRun,
}

impl AdapterMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "0" | "filtered" => Some(AdapterMode::Filtered),
            "1" | "run-all" | "run_all" => Some(AdapterMode::RunAll),
            "2" | "new-run" | "new_run" => Some(AdapterMode::NewRun),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for AdapterMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let text = match &raw {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        AdapterMode::from_str(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown adapter mode: {text}")))
    }
}

/// Bounded retry settings for work-item link calls
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff_min_ms: 0,
            backoff_max_ms: 1000,
        }
    }
}

/// Worker coordination service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStorageConfig {
    pub enabled: bool,
    pub port: String,
    pub startup_timeout_secs: u64,
    pub health_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Start a local service when none answers
    pub launch: bool,
    /// Command used to start the service; defaults to this executable
    pub command: Option<Vec<String>>,
}

impl Default for SyncStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "49152".to_string(),
            startup_timeout_secs: 30,
            health_timeout_ms: 1000,
            poll_interval_ms: 1000,
            launch: true,
            command: None,
        }
    }
}

impl SyncStorageConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Adapter configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Base URL of the test management service
    pub url: String,

    /// API token sent as `PrivateToken`
    pub private_token: String,

    pub project_id: String,

    pub configuration_id: String,

    pub test_run_id: Option<String>,

    /// Name used when a new run is created
    pub test_run_name: Option<String>,

    pub adapter_mode: AdapterMode,

    /// Deliver each test when it finishes instead of in batches
    pub import_realtime: bool,

    /// Unlink work items that are no longer declared on a test
    pub automatic_link_updates: bool,

    pub max_step_depth: usize,

    /// Payloads per bulk slot before it is flushed
    pub bulk_capacity: usize,

    pub retry: RetryConfig,

    /// Timeout for every remote call, in seconds
    pub request_timeout_secs: u64,

    pub cert_validation: bool,

    pub sync_storage: SyncStorageConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            private_token: String::new(),
            project_id: String::new(),
            configuration_id: String::new(),
            test_run_id: None,
            test_run_name: None,
            adapter_mode: AdapterMode::default(),
            import_realtime: true,
            automatic_link_updates: false,
            max_step_depth: DEFAULT_MAX_DEPTH,
            bulk_capacity: 100,
            retry: RetryConfig::default(),
            request_timeout_secs: 30,
            cert_validation: true,
            sync_storage: SyncStorageConfig::default(),
        }
    }
}

impl AdapterConfig {
    /// Load configuration from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        if file::is_yaml_file(path) {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            })
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            })
        }
    }

    /// Apply environment overrides on top of file values
    pub fn with_env(mut self, env: &EnvConfig) -> Self {
        env.apply(&mut self);
        self
    }

    /// Check required values and their combinations
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        let url = Url::parse(&self.url).map_err(|e| ConfigError::Invalid {
            field: "url",
            reason: format!("'{}': {}", self.url, e),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid {
                field: "url",
                reason: format!("'{}' is not an http(s) URL with a host", self.url),
            });
        }
        if self.private_token.trim().is_empty() {
            return Err(ConfigError::Missing("private_token"));
        }
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("project_id"));
        }
        if self.configuration_id.trim().is_empty() {
            return Err(ConfigError::Missing("configuration_id"));
        }

        match (self.adapter_mode, self.test_run_id.as_deref()) {
            (AdapterMode::Filtered | AdapterMode::RunAll, None) => {
                return Err(ConfigError::Invalid {
                    field: "test_run_id",
                    reason: format!("required in {:?} mode", self.adapter_mode),
                });
            }
            (AdapterMode::NewRun, Some(_)) => {
                return Err(ConfigError::Invalid {
                    field: "test_run_id",
                    reason: "must not be set in NewRun mode".to_string(),
                });
            }
            _ => {}
        }

        if self.max_step_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_step_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.bulk_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "bulk_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.backoff_min_ms > self.retry.backoff_max_ms {
            return Err(ConfigError::Invalid {
                field: "retry",
                reason: "backoff_min_ms is greater than backoff_max_ms".to_string(),
            });
        }
        if self.sync_storage.enabled && self.sync_storage.port.parse::<u16>().is_err() {
            return Err(ConfigError::Invalid {
                field: "sync_storage.port",
                reason: format!("'{}' is not a port number", self.sync_storage.port),
            });
        }

        Ok(())
    }

    /// Example configuration printed by `config example`
    pub fn example() -> Self {
        Self {
            url: "https://tms.example.com".to_string(),
            private_token: "<token>".to_string(),
            project_id: "5236eb3f-7c05-46f9-a609-dc0278896464".to_string(),
            configuration_id: "15dbb164-c1aa-4cbf-830c-8c01ae14f4fb".to_string(),
            test_run_id: Some("e8d9a26d-e8d3-4e69-9b6c-1e7b2f5a3b1c".to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AdapterConfig {
        AdapterConfig::example()
    }

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();
        assert!(config.import_realtime);
        assert_eq!(config.max_step_depth, 14);
        assert_eq!(config.bulk_capacity, 100);
        assert_eq!(config.retry.attempts, 10);
        assert_eq!(config.retry.backoff_max_ms, 1000);
        assert_eq!(config.sync_storage.port, "49152");
        assert_eq!(config.sync_storage.startup_timeout_secs, 30);
    }

    #[test]
    fn test_example_is_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_required_values() {
        let config = AdapterConfig {
            private_token: String::new(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("private_token"))
        ));

        for url in ["tms.example.com", "https://", "ftp://tms.example.com", "http://"] {
            let config = AdapterConfig {
                url: url.to_string(),
                ..valid()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { field: "url", .. })),
                "{url} accepted"
            );
        }
    }

    #[test]
    fn test_mode_and_run_id_combinations() {
        let config = AdapterConfig {
            test_run_id: None,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = AdapterConfig {
            adapter_mode: AdapterMode::NewRun,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = AdapterConfig {
            adapter_mode: AdapterMode::NewRun,
            test_run_id: None,
            ..valid()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_adapter_mode_accepts_legacy_numbers() {
        let mode: AdapterMode = serde_json::from_str("2").unwrap();
        assert_eq!(mode, AdapterMode::NewRun);
        let mode: AdapterMode = serde_json::from_str("\"run-all\"").unwrap();
        assert_eq!(mode, AdapterMode::RunAll);
        assert!(serde_json::from_str::<AdapterMode>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_backoff_range_checked() {
        let config = AdapterConfig {
            retry: RetryConfig {
                attempts: 3,
                backoff_min_ms: 500,
                backoff_max_ms: 100,
            },
            ..valid()
        };
        assert!(config.validate().is_err());
    }
}
