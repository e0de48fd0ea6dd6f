//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::{AdapterConfig, AdapterMode};

/// Environment variable prefix
const ENV_PREFIX: &str = "TMS_ADAPTER";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// From TMS_ADAPTER_URL
    pub url: Option<String>,
    /// From TMS_ADAPTER_PRIVATE_TOKEN
    pub private_token: Option<String>,
    /// From TMS_ADAPTER_PROJECT_ID
    pub project_id: Option<String>,
    /// From TMS_ADAPTER_CONFIGURATION_ID
    pub configuration_id: Option<String>,
    /// From TMS_ADAPTER_TEST_RUN_ID
    pub test_run_id: Option<String>,
    /// From TMS_ADAPTER_TEST_RUN_NAME
    pub test_run_name: Option<String>,
    /// From TMS_ADAPTER_MODE
    pub adapter_mode: Option<AdapterMode>,
    /// From TMS_ADAPTER_IMPORT_REALTIME
    pub import_realtime: Option<bool>,
    /// From TMS_ADAPTER_AUTOMATIC_LINK_UPDATES
    pub automatic_link_updates: Option<bool>,
    /// From TMS_ADAPTER_CERT_VALIDATION
    pub cert_validation: Option<bool>,
    /// From TMS_ADAPTER_SYNC_STORAGE
    pub sync_storage: Option<bool>,
    /// From TMS_ADAPTER_SYNC_STORAGE_PORT
    pub sync_storage_port: Option<String>,
    /// From TMS_ADAPTER_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get_env = |name: &str| {
            lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.trim().is_empty())
        };
        let get_env_bool = |name: &str| get_env(name).map(|v| parse_bool(&v));

        Self {
            url: get_env("URL"),
            private_token: get_env("PRIVATE_TOKEN"),
            project_id: get_env("PROJECT_ID"),
            configuration_id: get_env("CONFIGURATION_ID"),
            test_run_id: get_env("TEST_RUN_ID"),
            test_run_name: get_env("TEST_RUN_NAME"),
            adapter_mode: get_env("MODE").and_then(|v| AdapterMode::from_str(&v)),
            import_realtime: get_env_bool("IMPORT_REALTIME"),
            automatic_link_updates: get_env_bool("AUTOMATIC_LINK_UPDATES"),
            cert_validation: get_env_bool("CERT_VALIDATION"),
            sync_storage: get_env_bool("SYNC_STORAGE"),
            sync_storage_port: get_env("SYNC_STORAGE_PORT"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.url.is_some()
            || self.private_token.is_some()
            || self.project_id.is_some()
            || self.configuration_id.is_some()
            || self.test_run_id.is_some()
            || self.test_run_name.is_some()
            || self.adapter_mode.is_some()
            || self.import_realtime.is_some()
            || self.automatic_link_updates.is_some()
            || self.cert_validation.is_some()
            || self.sync_storage.is_some()
            || self.sync_storage_port.is_some()
    }

    /// Override configuration values that are set in the environment
    pub fn apply(&self, config: &mut AdapterConfig) {
        if let Some(v) = &self.url {
            config.url = v.clone();
        }
        if let Some(v) = &self.private_token {
            config.private_token = v.clone();
        }
        if let Some(v) = &self.project_id {
            config.project_id = v.clone();
        }
        if let Some(v) = &self.configuration_id {
            config.configuration_id = v.clone();
        }
        if let Some(v) = &self.test_run_id {
            config.test_run_id = Some(v.clone());
        }
        if let Some(v) = &self.test_run_name {
            config.test_run_name = Some(v.clone());
        }
        if let Some(v) = self.adapter_mode {
            config.adapter_mode = v;
        }
        if let Some(v) = self.import_realtime {
            config.import_realtime = v;
        }
        if let Some(v) = self.automatic_link_updates {
            config.automatic_link_updates = v;
        }
        if let Some(v) = self.cert_validation {
            config.cert_validation = v;
        }
        if let Some(v) = self.sync_storage {
            config.sync_storage.enabled = v;
        }
        if let Some(v) = &self.sync_storage_port {
            config.sync_storage.port = v.clone();
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print help for environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_URL                     Test management service URL");
    println!("  {ENV_PREFIX}_PRIVATE_TOKEN           API token");
    println!("  {ENV_PREFIX}_PROJECT_ID              Project identifier");
    println!("  {ENV_PREFIX}_CONFIGURATION_ID        Configuration identifier");
    println!("  {ENV_PREFIX}_TEST_RUN_ID             Existing test run identifier");
    println!("  {ENV_PREFIX}_TEST_RUN_NAME           Name for a newly created run");
    println!("  {ENV_PREFIX}_MODE                    filtered | run-all | new-run (or 0/1/2)");
    println!("  {ENV_PREFIX}_IMPORT_REALTIME         Deliver each test as it finishes");
    println!("  {ENV_PREFIX}_AUTOMATIC_LINK_UPDATES  Unlink stale work items");
    println!("  {ENV_PREFIX}_CERT_VALIDATION         Validate TLS certificates");
    println!("  {ENV_PREFIX}_SYNC_STORAGE            Coordinate with other workers");
    println!("  {ENV_PREFIX}_SYNC_STORAGE_PORT       Coordination service port");
    println!("  {ENV_PREFIX}_CONFIG                  Config file path");
    println!("  {ENV_PREFIX}_LOG                     Log filter, e.g. tms_adapter::delivery=debug");
    println!("  RUST_LOG                              Log filter when {ENV_PREFIX}_LOG is unset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("enabled"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());
    }

    #[test]
    fn test_from_lookup() {
        let env = EnvConfig::from_lookup(lookup(&[
            ("TMS_ADAPTER_URL", "https://tms.local"),
            ("TMS_ADAPTER_MODE", "2"),
            ("TMS_ADAPTER_IMPORT_REALTIME", "false"),
            ("TMS_ADAPTER_TEST_RUN_ID", "  "),
        ]));

        assert!(env.has_any());
        assert_eq!(env.url.as_deref(), Some("https://tms.local"));
        assert_eq!(env.adapter_mode, Some(AdapterMode::NewRun));
        assert_eq!(env.import_realtime, Some(false));
        assert_eq!(env.test_run_id, None);
    }

    #[test]
    fn test_apply_overrides_only_set_values() {
        let mut config = AdapterConfig::example();
        let env = EnvConfig::from_lookup(lookup(&[
            ("TMS_ADAPTER_PRIVATE_TOKEN", "secret"),
            ("TMS_ADAPTER_SYNC_STORAGE", "yes"),
        ]));
        env.apply(&mut config);

        assert_eq!(config.private_token, "secret");
        assert!(config.sync_storage.enabled);
        assert_eq!(config.url, "https://tms.example.com");
    }
}
