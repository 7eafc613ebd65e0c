//! Configuration management for the devote node

use crate::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the state database and head file
    pub data_dir: PathBuf,
    /// State database file name, relative to `data_dir`
    pub database_file: String,
    /// Head file name, relative to `data_dir`
    pub head_file: String,
    /// Log level used when `--verbose` is not given
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::get_default_config_dir().join("data"),
            database_file: "state.db".to_string(),
            head_file: "head.json".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Configuration rooted at `data_dir`, other settings default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Create configuration from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("Failed to read config file: {}", e)))?;

        if is_toml(path) {
            toml::from_str(&config_str)
                .map_err(|e| NodeError::Config(format!("Failed to parse TOML config: {}", e)))
        } else {
            serde_json::from_str(&config_str)
                .map_err(|e| NodeError::Config(format!("Failed to parse JSON config: {}", e)))
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let config_str = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| {
                NodeError::Config(format!("Failed to serialize config as TOML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                NodeError::Config(format!("Failed to serialize config as JSON: {}", e))
            })?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, config_str)
            .map_err(|e| NodeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, file) in [
            ("database_file", &self.database_file),
            ("head_file", &self.head_file),
        ] {
            if file.is_empty() {
                return Err(NodeError::Config(format!("{} cannot be empty", name)));
            }
            if Path::new(file).components().count() != 1 {
                return Err(NodeError::Config(format!(
                    "{} must be a plain file name, got {}",
                    name, file
                )));
            }
        }

        if self.database_file == self.head_file {
            return Err(NodeError::Config(
                "database_file and head_file must differ".to_string(),
            ));
        }

        self.level()?;
        Ok(())
    }

    /// Parsed `log_level`
    pub fn level(&self) -> Result<tracing::Level> {
        self.log_level
            .parse()
            .map_err(|_| NodeError::Config(format!("Unknown log level: {}", self.log_level)))
    }

    /// Full path of the state database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Full path of the head file
    pub fn head_path(&self) -> PathBuf {
        self.data_dir.join(&self.head_file)
    }

    /// Get default configuration file path
    pub fn get_default_config_file() -> PathBuf {
        crate::get_default_config_dir().join("node.toml")
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_paths() {
        let config = NodeConfig::with_data_dir("/tmp/devote");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/devote/state.db"));
        assert_eq!(config.head_path(), PathBuf::from("/tmp/devote/head.json"));
    }

    #[test]
    fn test_invalid_log_level() {
        let config = NodeConfig {
            log_level: "loud".to_string(),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_nested_file_name_rejected() {
        let config = NodeConfig {
            database_file: "nested/state.db".to_string(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_file_names_rejected() {
        let config = NodeConfig {
            head_file: "state.db".to_string(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
