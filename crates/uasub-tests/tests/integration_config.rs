// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration integration tests.
//!
//! Test categories:
//! - Loading YAML, TOML and JSON files into engine limits
//! - Environment overrides and placeholders
//! - Validation failures

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use uasub_config::{ConfigError, ConfigLoader, LogFormat, LogLevel, ServerConfig};
use uasub_core::StatusCode;
use uasub_tests::common::temp_test_dir;
use uasub_tests::prelude::*;

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

// Each test reads its own prefix so parallel tests never see each other's
// variables.
fn loader(prefix: &str) -> ConfigLoader {
    ConfigLoader::builder().env_prefix(prefix).build()
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_yaml_limits_drive_the_engine() {
    init_test_logging();
    let dir = temp_test_dir("uasub-config");
    let path = write(&dir, "uasub.yaml", ConfigFixtures::yaml());

    let config = loader("UASUB_IT_YAML").load(&path).unwrap();
    assert_eq!(config.server.name, "integration");
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, LogFormat::Compact);
    assert_eq!(config.simulation.duration, Duration::from_secs(2));

    let server = TestServer::new(config.limits);
    let session = server.open_session(1);
    for _ in 0..4 {
        session.create_fast();
    }
    let err = session
        .create_subscription(&RequestFixtures::fast_subscription())
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS);

    let id = session.subscription_ids()[0];
    let err = session
        .create_monitored_items(id, &RequestFixtures::items(9, 4))
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_TOO_MANY_MONITORED_ITEMS);
}

#[tokio::test]
async fn test_toml_and_yaml_agree() {
    let dir = temp_test_dir("uasub-config");
    let yaml = write(&dir, "uasub.yaml", ConfigFixtures::yaml());
    let toml = write(&dir, "uasub.toml", ConfigFixtures::toml());

    let from_yaml = loader("UASUB_IT_AGREE").load(&yaml).unwrap();
    let from_toml = loader("UASUB_IT_AGREE").load(&toml).unwrap();

    assert_eq!(from_yaml.server, from_toml.server);
    assert_eq!(from_yaml.limits, from_toml.limits);
    assert_eq!(from_yaml.logging, from_toml.logging);
}

#[tokio::test]
async fn test_json_written_from_loaded_config_loads_back() {
    let dir = temp_test_dir("uasub-config");
    let yaml = write(&dir, "uasub.yaml", ConfigFixtures::yaml());
    let config = loader("UASUB_IT_JSON").load(&yaml).unwrap();

    let json = serde_json::to_string_pretty(&config).unwrap();
    let path = write(&dir, "uasub.json", &json);
    let reloaded: ServerConfig = loader("UASUB_IT_JSON").load(&path).unwrap();
    assert_eq!(reloaded, config);
}

// =============================================================================
// Environment
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_environment_override_tightens_limits() {
    let dir = temp_test_dir("uasub-config");
    let path = write(&dir, "uasub.yaml", ConfigFixtures::yaml());
    // SAFETY: the variable is unique to this test and only read by it.
    unsafe { std::env::set_var("UASUB_IT_ENV_LIMITS_MAX_SUBSCRIPTIONS_PER_SESSION", "1") };

    let config = loader("UASUB_IT_ENV").load(&path).unwrap();
    assert_eq!(config.limits.max_subscriptions_per_session, 1);

    let server = TestServer::new(config.limits);
    let session = server.open_session(1);
    session.create_fast();
    assert!(session
        .create_subscription(&RequestFixtures::fast_subscription())
        .is_err());
}

#[test]
fn test_placeholder_resolution_with_default() {
    let content = "server:\n  name: ${UASUB_IT_PLACEHOLDER_NAME:fallback}\n";
    let config = loader("UASUB_IT_PLACEHOLDER")
        .load_from_str(content, uasub_config::ConfigFormat::Yaml)
        .unwrap();
    assert_eq!(config.server.name, "fallback");

    // SAFETY: the variable is unique to this test and only read by it.
    unsafe { std::env::set_var("UASUB_IT_PLACEHOLDER_NAME", "line-3") };
    let config = loader("UASUB_IT_PLACEHOLDER")
        .load_from_str(content, uasub_config::ConfigFormat::Yaml)
        .unwrap();
    assert_eq!(config.server.name, "line-3");
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_inverted_interval_bounds_rejected() {
    let dir = temp_test_dir("uasub-config");
    let path = write(&dir, "uasub.yaml", ConfigFixtures::invalid_limits_yaml());

    let err = loader("UASUB_IT_INVALID").load(&path).unwrap_err();
    assert!(err.is_validation_error());
    assert_eq!(err.error_type(), "limits");
}

#[test]
fn test_unknown_field_is_a_parse_error() {
    let dir = temp_test_dir("uasub-config");
    let path = write(&dir, "uasub.yaml", "limits:\n  max_subscribers: 3\n");

    let err = loader("UASUB_IT_UNKNOWN").load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_missing_file() {
    let err = loader("UASUB_IT_MISSING")
        .load("/nonexistent/uasub.yaml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}
