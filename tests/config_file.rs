use nel::runtime::{ConfigError, ServerConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn config_file_overrides_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nel.json");
    fs::write(&path, r#"{"debug": true, "inspect_depth": 4}"#).unwrap();

    let config = ServerConfig::from_file(&path).unwrap();
    assert!(config.debug);
    assert!(!config.await_execution);
    assert_eq!(config.inspect_depth, 4);
}

#[test]
fn environment_overrides_the_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nel.json");
    fs::write(&path, r#"{"debug": true}"#).unwrap();

    let mut config = ServerConfig::from_file(&path).unwrap();
    config.apply_env_from(|key| (key == "DEBUG").then(String::new));
    assert!(!config.debug);
}

#[test]
fn config_errors_name_the_file() {
    let temp = TempDir::new().unwrap();

    let missing = temp.path().join("absent.json");
    let error = ServerConfig::from_file(&missing).unwrap_err();
    assert!(matches!(error, ConfigError::Io { .. }));
    assert!(error.to_string().contains("absent.json"));

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ debug: yes").unwrap();
    let error = ServerConfig::from_file(&broken).unwrap_err();
    assert!(matches!(error, ConfigError::Parse { .. }));
    assert!(error.to_string().contains("broken.json"));
}
