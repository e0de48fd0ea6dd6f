//! Configuration file management
//!
//! Handles finding, loading and saving configuration files.

use std::path::{Path, PathBuf};

use super::{AdapterConfig, ConfigError};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./tms-adapter.yaml",
    "./tms-adapter.yml",
    "./tms-adapter.json",
    "./.tms-adapter.yaml",
    "~/.config/tms-adapter/config.yaml",
];

/// Find configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Load configuration from the default location, or defaults when none exists
pub fn load_default() -> Result<AdapterConfig, ConfigError> {
    match find_config_file() {
        Some(path) => AdapterConfig::load(path),
        None => Ok(AdapterConfig::default()),
    }
}

impl AdapterConfig {
    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                reason: e.to_string(),
            })?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: display,
            source,
        })
    }
}

/// Expand ~ to home directory
pub(crate) fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterMode;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = AdapterConfig::example();
        config.save(&path).unwrap();

        let loaded = AdapterConfig::load(&path).unwrap();
        assert_eq!(loaded.url, config.url);
        assert_eq!(loaded.test_run_id, config.test_run_id);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AdapterConfig {
            bulk_capacity: 7,
            ..AdapterConfig::example()
        };
        config.save(&path).unwrap();

        let loaded = AdapterConfig::load(&path).unwrap();
        assert_eq!(loaded.bulk_capacity, 7);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "url: https://tms.local\nadapter_mode: 1\nsync_storage:\n  enabled: true\n",
        )
        .unwrap();

        let loaded = AdapterConfig::load(&path).unwrap();
        assert_eq!(loaded.adapter_mode, AdapterMode::RunAll);
        assert!(loaded.sync_storage.enabled);
        assert_eq!(loaded.sync_storage.port, "49152");
        assert_eq!(loaded.bulk_capacity, 100);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AdapterConfig::load("/nonexistent/tms-adapter.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
        assert!(is_yaml_file(Path::new("a.yml")));
        assert!(!is_yaml_file(Path::new("a.json")));
    }
}
