//! Tests for client configuration.

use super::*;
use std::io::Write;

/// Test that validate requires an endpoint
#[test]
fn test_validate_requires_endpoint() {
    // Act
    let config = ClientConfig::new("  ", "test");

    // Assert
    match config.validate() {
        Err(ConfigurationError::Missing { key }) => assert_eq!(key, "endpoint"),
        other => panic!("Expected Missing error, got: {:?}", other),
    }
}

/// Test that validate requires a namespace
#[test]
fn test_validate_requires_namespace() {
    // Act
    let config = ClientConfig::new("127.0.0.1:8081", "");

    // Assert
    match config.validate() {
        Err(ConfigurationError::Missing { key }) => assert_eq!(key, "namespace"),
        other => panic!("Expected Missing error, got: {:?}", other),
    }
}

/// Test that half-configured credentials are rejected
#[test]
fn test_validate_rejects_half_configured_credentials() {
    // Act
    let config = ClientConfig::new("127.0.0.1:8081", "test").with_credentials("ak", "");

    // Assert
    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));
}

/// Test defaults for optional settings
#[test]
fn test_defaults_for_optional_settings() {
    // Act
    let config = ClientConfig::new("127.0.0.1:8081", "test");

    // Assert
    assert!(config.validate().is_ok());
    assert_eq!(config.log.path, PathBuf::from("/tmp"));
    assert!(!config.log.stdout);
    assert!(!config.debug);
    assert!(config.flow_color.is_none());
    assert!(config.consumer_group.is_empty());
}

/// Test that Debug output redacts the secret
#[test]
fn test_debug_output_redacts_secret() {
    // Arrange
    let config = ClientConfig::new("127.0.0.1:8081", "test")
        .with_credentials("my-key", "super-secret")
        .with_debug_handler(|_| {});

    // Act
    let rendered = format!("{:?}", config);

    // Assert
    assert!(rendered.contains("my-key"));
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("debug_handler: true"));
}

/// Test loading from a YAML file
#[test]
fn test_load_from_yaml_file() {
    // Arrange
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp file");
    writeln!(
        file,
        "endpoint: 127.0.0.1:18081\n\
         namespace: test\n\
         consumer_group: cg_test_demo\n\
         debug: true\n\
         log:\n  stdout: true\n\
         flow_color:\n  color: blue\n  base: true"
    )
    .unwrap();

    // Act
    let config = ClientConfig::load(Some(file.path())).expect("Config should load");

    // Assert
    assert_eq!(config.endpoint, "127.0.0.1:18081");
    assert_eq!(config.namespace, "test");
    assert_eq!(config.consumer_group, "cg_test_demo");
    assert!(config.debug);
    assert!(config.log.stdout);
    assert_eq!(config.log.path, PathBuf::from("/tmp"));
    assert_eq!(
        config.flow_color,
        Some(FlowColorConfig {
            color: "blue".to_string(),
            base: true,
        })
    );
}

/// Test that a file missing required keys is rejected
#[test]
fn test_load_rejects_file_missing_required_keys() {
    // Arrange
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp file");
    writeln!(file, "endpoint = \"127.0.0.1:18081\"\nnamespace = \"\"").unwrap();

    // Act
    let result = ClientConfig::load(Some(file.path()));

    // Assert
    assert!(matches!(result, Err(ConfigurationError::Missing { .. })));
}
