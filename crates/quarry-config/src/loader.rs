// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./quarry.toml` > `~/.config/quarry/quarry.toml` > `/etc/quarry/quarry.toml`
//! with environment variable overrides via the `QUARRY_` prefix, plus the bare
//! `ENVIRONMENT` and `DATABASE_URL` variables, which may also come from
//! `./data/.env`.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment, Metadata, Profile, Provider, Source,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
};

use crate::model::QuarryConfig;

/// Sections whose keys may be set through `QUARRY_<SECTION>_<KEY>`.
const SECTIONS: &[&str] = &["storage", "migrations", "server"];

/// Unprefixed variables read from the process environment and `data/.env`.
const RAW_VARS: &[&str] = &["ENVIRONMENT", "DATABASE_URL"];

/// Dotenv file consulted before the process environment.
pub const DOTENV_PATH: &str = "data/.env";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/quarry/quarry.toml` (system-wide)
/// 3. `~/.config/quarry/quarry.toml` (user XDG config)
/// 4. `./quarry.toml` (local directory)
/// 5. `ENVIRONMENT` / `DATABASE_URL` from `./data/.env`
/// 6. `ENVIRONMENT` / `DATABASE_URL` from the process environment
/// 7. `QUARRY_*` environment variables
pub fn load_config() -> Result<QuarryConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<QuarryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(QuarryConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<QuarryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(QuarryConfig::default()))
        .merge(Toml::file(path))
        .merge(DotEnvFile::new(DOTENV_PATH))
        .merge(raw_env_provider())
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(QuarryConfig::default()))
        .merge(Toml::file("/etc/quarry/quarry.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("quarry/quarry.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("quarry.toml"))
        .merge(DotEnvFile::new(DOTENV_PATH))
        .merge(raw_env_provider())
        .merge(env_provider())
}

/// The unprefixed variables a deployment typically already sets.
fn raw_env_provider() -> Env {
    Env::raw().only(RAW_VARS).map(|key| match raw_key(key.as_str()) {
        Some(mapped) => mapped.into(),
        None => key.as_str().to_ascii_lowercase().into(),
    })
}

/// Config key for one of [`RAW_VARS`].
fn raw_key(var: &str) -> Option<&'static str> {
    if var.eq_ignore_ascii_case("environment") {
        Some("environment")
    } else if var.eq_ignore_ascii_case("database_url") {
        Some("storage.database_url")
    } else {
        None
    }
}

/// `ENVIRONMENT` and `DATABASE_URL` read from a dotenv file.
///
/// The file is parsed, never loaded into the process environment, so real
/// environment variables merged after it still win. A missing file
/// contributes nothing; a malformed one is an error. Other keys in the file
/// are ignored.
#[derive(Debug, Clone)]
pub struct DotEnvFile {
    path: PathBuf,
}

impl DotEnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Provider for DotEnvFile {
    fn metadata(&self) -> Metadata {
        Metadata::named("dotenv file").source(Source::File(self.path.clone()))
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let entries = match dotenvy::from_path_iter(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.not_found() => return Ok(Map::new()),
            Err(e) => return Err(dotenv_error(&self.path, e)),
        };

        let mut layer = Figment::new();
        for entry in entries {
            let (var, value) = entry.map_err(|e| dotenv_error(&self.path, e))?;
            if let Some(key) = raw_key(&var) {
                layer = layer.merge(Serialized::global(key, value));
            }
        }
        layer.data()
    }
}

fn dotenv_error(path: &Path, e: dotenvy::Error) -> figment::Error {
    figment::Error::from(format!("{}: {e}", path.display()))
}

/// Create the `QUARRY_` provider with explicit section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `QUARRY_STORAGE_BUSY_TIMEOUT_MS` must map to
/// `storage.busy_timeout_ms`, not `storage.busy.timeout.ms`.
fn env_provider() -> Env {
    Env::prefixed("QUARRY_").map(|key| section_key(key.as_str()).into())
}

fn section_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key
}
