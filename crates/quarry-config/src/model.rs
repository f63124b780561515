// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for Quarry.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use quarry_core::Environment;
use serde::{Deserialize, Serialize};

/// Top-level Quarry configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuarryConfig {
    /// Deployment environment. Read once at startup; gates destructive tasks.
    #[serde(default)]
    pub environment: Environment,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database file and connection settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Migration source and schema snapshot settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// HTTP listener settings for `serve`.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            migrations: MigrationsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite connection string (plain path or `file:` URI).
    /// `None` means `{data_dir}/{ENV}.sqlite3`.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Directory holding the per-environment database files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// How long a statement waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Value for `PRAGMA cache_size` on every handle.
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,

    /// Read handle concurrency ceiling. `None` uses the number of available CPUs.
    #[serde(default)]
    pub max_read_connections: Option<usize>,

    /// Pause between closing and reopening handles during WAL recovery.
    #[serde(default = "default_recovery_pause_ms")]
    pub recovery_pause_ms: u64,
}

impl StorageConfig {
    /// The configured connection string, or the per-environment default.
    pub fn database_url(&self, environment: Environment) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("{}/{}.sqlite3", self.data_dir, environment.short_name()),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            data_dir: default_data_dir(),
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size: default_cache_size(),
            max_read_connections: None,
            recovery_pause_ms: default_recovery_pause_ms(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_cache_size() -> i64 {
    1_000_000_000
}

fn default_recovery_pause_ms() -> u64 {
    1000
}

/// How the schema snapshot text is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaDumpMode {
    /// Read `sqlite_master` through the read handle.
    #[default]
    Native,
    /// Shell out to the `sqlite3` command-line shell's `.schema`.
    Sqlite3Cli,
}

/// Migration runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Directory of `{version}_{title}.up.sql` / `.down.sql` files.
    #[serde(default = "default_migrations_dir")]
    pub dir: String,

    /// Schema snapshot output, overwritten after every non-production change.
    #[serde(default = "default_schema_path")]
    pub schema_path: String,

    #[serde(default)]
    pub schema_dump: SchemaDumpMode,

    /// `sqlite3` executable used when `schema_dump = "sqlite3-cli"`.
    #[serde(default = "default_sqlite3_bin")]
    pub sqlite3_bin: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            schema_path: default_schema_path(),
            schema_dump: SchemaDumpMode::default(),
            sqlite3_bin: default_sqlite3_bin(),
        }
    }
}

fn default_migrations_dir() -> String {
    "db/migrations".to_string()
}

fn default_schema_path() -> String {
    "db/schema.sql".to_string()
}

fn default_sqlite3_bin() -> String {
    "sqlite3".to_string()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address `serve` listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_url_is_named_after_environment() {
        let storage = StorageConfig::default();
        assert_eq!(
            storage.database_url(Environment::Development),
            "data/DEV.sqlite3"
        );
        assert_eq!(
            storage.database_url(Environment::Production),
            "data/PROD.sqlite3"
        );
    }

    #[test]
    fn explicit_database_url_wins() {
        let storage = StorageConfig {
            database_url: Some("file:/tmp/x.sqlite3".into()),
            ..StorageConfig::default()
        };
        assert_eq!(
            storage.database_url(Environment::Staging),
            "file:/tmp/x.sqlite3"
        );
    }
}
