// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as parseable socket addresses, non-empty paths and positive timeouts.

use crate::diagnostic::ConfigError;
use crate::model::{QuarryConfig, SchemaDumpMode};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &QuarryConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        fail(format!(
            "log_level `{}` must be one of: {}",
            config.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if let Some(url) = &config.storage.database_url
        && url.trim().is_empty()
    {
        fail("storage.database_url must not be empty when set".to_string());
    }

    if config.storage.data_dir.trim().is_empty() {
        fail("storage.data_dir must not be empty".to_string());
    }

    if config.storage.busy_timeout_ms == 0 {
        fail("storage.busy_timeout_ms must be greater than zero".to_string());
    }

    if config.storage.max_read_connections == Some(0) {
        fail("storage.max_read_connections must be at least 1".to_string());
    }

    if config.migrations.dir.trim().is_empty() {
        fail("migrations.dir must not be empty".to_string());
    }

    if config.migrations.schema_path.trim().is_empty() {
        fail("migrations.schema_path must not be empty".to_string());
    }

    if config.migrations.schema_dump == SchemaDumpMode::Sqlite3Cli
        && config.migrations.sqlite3_bin.trim().is_empty()
    {
        fail("migrations.sqlite3_bin must be set when schema_dump = \"sqlite3-cli\"".to_string());
    }

    if config
        .server
        .listen_addr
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        fail(format!(
            "server.listen_addr `{}` is not a valid socket address",
            config.server.listen_addr
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
