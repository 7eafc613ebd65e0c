//! Node configuration files

use devote_node::{NodeConfig, NodeError};
use tempfile::TempDir;

#[test]
fn test_toml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.toml");
    let config = NodeConfig {
        log_level: "debug".to_string(),
        ..NodeConfig::with_data_dir(dir.path().join("data"))
    };

    config.save_to_file(&path).unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("log_level = \"debug\""));
    assert_eq!(NodeConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_json_config_with_missing_fields_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.json");
    std::fs::write(&path, r#"{ "data_dir": "/var/lib/devote" }"#).unwrap();

    let config = NodeConfig::from_file(&path).unwrap();
    assert_eq!(config.data_dir, std::path::PathBuf::from("/var/lib/devote"));
    assert_eq!(config.database_file, NodeConfig::default().database_file);
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_unparsable_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.toml");
    std::fs::write(&path, "data_dir = [").unwrap();

    assert!(matches!(
        NodeConfig::from_file(&path),
        Err(NodeError::Config(_))
    ));
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let result = NodeConfig::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(NodeError::Config(_))));
}
