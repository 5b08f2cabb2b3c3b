//! Integration tests for loading directory configuration.

use ldapi::config::{DirectoryConfig, DEFAULT_OPERATION_TIMEOUT_SECS};
use ldapi::option::{DirectoryOption, OptionValue};
use ldapi::Error;
use secrecy::ExposeSecret;
use std::fs;
use std::path::PathBuf;

/// Get the path to the test fixtures directory.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn load_config_fixture() -> String {
    let fixture_path = fixtures_dir().join("directory_config.json");
    fs::read_to_string(&fixture_path).unwrap_or_else(|e| {
        panic!(
            "Failed to read config fixture at {}: {}",
            fixture_path.display(),
            e
        )
    })
}

#[test]
fn test_deserialize_directory_config() {
    let json_data = load_config_fixture();
    let config: DirectoryConfig = serde_json::from_str(&json_data)
        .unwrap_or_else(|e| panic!("Failed to deserialize config: {e}\nJSON: {json_data}"));
    config.validated().unwrap();

    assert_eq!(config.url().unwrap().as_str(), "ldaps://ldap.example.com:636");
    assert_eq!(config.bind_dn(), Some("cn=admin,dc=example,dc=com"));
    assert_eq!(
        config.bind_password().map(|secret| secret.expose_secret()),
        Some("correct horse battery staple")
    );

    let options = config.options();
    assert_eq!(options.len(), 3);
    assert_eq!(options[0].option, DirectoryOption::ProtocolVersion);
    assert_eq!(options[1].value, OptionValue::Integer(500));
    assert_eq!(options[2].value, OptionValue::Boolean(false));

    let transport = config.transport();
    assert!(!transport.tls_verify);
    assert_eq!(transport.connection_timeout_secs, 5);
    assert_eq!(transport.operation_timeout_secs, DEFAULT_OPERATION_TIMEOUT_SECS);
}

#[test]
fn test_password_is_not_debug_printed() {
    let config: DirectoryConfig = serde_json::from_str(&load_config_fixture()).unwrap();
    let debug = format!("{config:?}");
    assert!(!debug.contains("correct horse"));
}

#[test]
fn test_invalid_configs_are_rejected() {
    let config: DirectoryConfig =
        serde_json::from_str(r#"{"host": "ldap.example.com", "transport": {"connection_timeout_secs": 0}}"#)
            .unwrap();
    assert!(matches!(config.validated(), Err(Error::ConfigError(_))));

    let config: DirectoryConfig = serde_json::from_str(r#"{"host": "http://example.com"}"#).unwrap();
    assert!(matches!(config.validated(), Err(Error::ConfigError(_))));

    let unknown = serde_json::from_str::<DirectoryConfig>(
        r#"{"host": "ldap.example.com", "options": [{"option": "colour", "value": 1}]}"#,
    );
    assert!(unknown.is_err());
}
