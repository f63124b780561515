// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Quarry configuration system.

use figment::Jail;
use quarry_config::diagnostic::ConfigError;
use quarry_config::model::{QuarryConfig, SchemaDumpMode};
use quarry_config::{load_and_validate, load_and_validate_str, load_config_from_str};
use quarry_core::Environment;
use serial_test::serial;

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_quarry_config() {
    let toml = r#"
environment = "STG"
log_level = "debug"

[storage]
database_url = "/tmp/test.sqlite3"
data_dir = "/var/lib/quarry"
busy_timeout_ms = 2500
cache_size = -2000
max_read_connections = 4
recovery_pause_ms = 10

[migrations]
dir = "schema/migrations"
schema_path = "schema/schema.sql"
schema_dump = "sqlite3-cli"
sqlite3_bin = "/usr/bin/sqlite3"

[server]
listen_addr = "127.0.0.1:8080"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.environment, Environment::Staging);
    assert_eq!(config.log_level, "debug");
    assert_eq!(
        config.storage.database_url.as_deref(),
        Some("/tmp/test.sqlite3")
    );
    assert_eq!(config.storage.data_dir, "/var/lib/quarry");
    assert_eq!(config.storage.busy_timeout_ms, 2500);
    assert_eq!(config.storage.cache_size, -2000);
    assert_eq!(config.storage.max_read_connections, Some(4));
    assert_eq!(config.storage.recovery_pause_ms, 10);
    assert_eq!(config.migrations.dir, "schema/migrations");
    assert_eq!(config.migrations.schema_path, "schema/schema.sql");
    assert_eq!(config.migrations.schema_dump, SchemaDumpMode::Sqlite3Cli);
    assert_eq!(config.migrations.sqlite3_bin, "/usr/bin/sqlite3");
    assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.log_level, "info");
    assert!(config.storage.database_url.is_none());
    assert_eq!(
        config.storage.database_url(config.environment),
        "data/DEV.sqlite3"
    );
    assert_eq!(config.storage.busy_timeout_ms, 5000);
    assert_eq!(config.storage.cache_size, 1_000_000_000);
    assert_eq!(config.storage.recovery_pause_ms, 1000);
    assert_eq!(config.migrations.dir, "db/migrations");
    assert_eq!(config.migrations.schema_path, "db/schema.sql");
    assert_eq!(config.migrations.schema_dump, SchemaDumpMode::Native);
    assert_eq!(config.server.listen_addr, "0.0.0.0:3000");
}

#[test]
fn unknown_field_in_storage_produces_suggestion() {
    let toml = r#"
[storage]
busy_timout_ms = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey { suggestion, .. } => {
            assert_eq!(suggestion.as_deref(), Some("busy_timeout_ms"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_environment_is_rejected() {
    let errors = load_and_validate_str(r#"environment = "qa""#)
        .expect_err("unknown environment should fail");
    let rendered = errors[0].to_string();
    assert!(
        rendered.contains("unknown environment"),
        "got: {rendered}"
    );
}

#[test]
fn validation_errors_are_reported() {
    let toml = r#"
[server]
listen_addr = "not-an-address"
"#;
    let errors = load_and_validate_str(toml).expect_err("bad address should fail validation");
    assert!(matches!(errors[0], ConfigError::Validation { .. }));
}

/// Serialized defaults survive the figment round trip used as the base layer.
#[test]
fn serialized_defaults_are_sensible() {
    use figment::{Figment, providers::Serialized};

    let config: QuarryConfig = Figment::new()
        .merge(Serialized::defaults(QuarryConfig::default()))
        .extract()
        .expect("defaults should extract");
    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.migrations.schema_dump, SchemaDumpMode::Native);
}

#[test]
#[serial]
fn bare_environment_and_database_url_vars_are_honoured() {
    Jail::expect_with(|jail| {
        jail.set_env("ENVIRONMENT", "PROD");
        jail.set_env("DATABASE_URL", "file:data/custom.sqlite3");

        let config = load_and_validate().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(
            config.storage.database_url(config.environment),
            "file:data/custom.sqlite3"
        );
        Ok(())
    });
}

#[test]
#[serial]
fn prefixed_vars_override_local_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "quarry.toml",
            r#"
environment = "dev"

[storage]
busy_timeout_ms = 100
"#,
        )?;
        jail.set_env("ENVIRONMENT", "STG");
        jail.set_env("QUARRY_ENVIRONMENT", "PROD");
        jail.set_env("QUARRY_STORAGE_BUSY_TIMEOUT_MS", "250");
        jail.set_env("QUARRY_MIGRATIONS_SCHEMA_PATH", "out/schema.sql");

        let config = load_and_validate().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert_eq!(config.migrations.schema_path, "out/schema.sql");
        Ok(())
    });
}

#[test]
#[serial]
fn data_dotenv_file_supplies_environment_and_database_url() {
    Jail::expect_with(|jail| {
        std::fs::create_dir_all(jail.directory().join("data")).expect("create data dir");
        jail.create_file(
            "data/.env",
            "ENVIRONMENT=STG\nDATABASE_URL=file:data/from-dotenv.sqlite3\nHTTPS_CERT_PATH=cert.pem\n",
        )?;

        let config = load_and_validate().expect("config should load");
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(
            config.storage.database_url(config.environment),
            "file:data/from-dotenv.sqlite3"
        );
        Ok(())
    });
}

#[test]
#[serial]
fn process_environment_wins_over_dotenv_file() {
    Jail::expect_with(|jail| {
        std::fs::create_dir_all(jail.directory().join("data")).expect("create data dir");
        jail.create_file("data/.env", "ENVIRONMENT=PROD\nDATABASE_URL=dotenv.sqlite3\n")?;
        jail.set_env("ENVIRONMENT", "DEV");

        let config = load_and_validate().expect("config should load");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(
            config.storage.database_url(config.environment),
            "dotenv.sqlite3"
        );
        Ok(())
    });
}

#[test]
#[serial]
fn malformed_dotenv_file_is_a_config_error() {
    Jail::expect_with(|jail| {
        std::fs::create_dir_all(jail.directory().join("data")).expect("create data dir");
        jail.create_file("data/.env", "ENVIRONMENT PROD\n")?;

        let errors = load_and_validate().expect_err("malformed dotenv must fail");
        assert!(!errors.is_empty());
        Ok(())
    });
}
