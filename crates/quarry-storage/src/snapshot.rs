// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schema snapshots: a textual dump of the current schema written next to
//! the migrations after every successful migrate or rollback.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quarry_config::model::{MigrationsConfig, SchemaDumpMode};
use quarry_core::{BoxError, QuarryError};
use tokio::process::Command;
use tracing::{debug, info};

use crate::context::QueryContext;
use crate::database::Database;

/// Produces the schema text that is written to the snapshot file.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    fn name(&self) -> &str;

    async fn schema_sql(&self, db: &Database) -> Result<String, QuarryError>;
}

/// Reads `sqlite_master` through the read pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeIntrospector;

#[async_trait]
impl SchemaIntrospector for NativeIntrospector {
    fn name(&self) -> &str {
        "native"
    }

    async fn schema_sql(&self, db: &Database) -> Result<String, QuarryError> {
        let rows = db
            .query(
                &QueryContext::background(),
                "SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY rowid",
                (),
            )
            .await?;

        let mut out = String::new();
        for row in rows.rows {
            if let Some(rusqlite::types::Value::Text(sql)) = row.into_iter().next() {
                out.push_str(&sql);
                out.push_str(";\n");
            }
        }
        debug!(bytes = out.len(), "schema introspected");
        Ok(out)
    }
}

/// Runs `sqlite3 <db> .schema`.
#[derive(Debug, Clone)]
pub struct Sqlite3CliIntrospector {
    binary: PathBuf,
}

impl Sqlite3CliIntrospector {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl SchemaIntrospector for Sqlite3CliIntrospector {
    fn name(&self) -> &str {
        "sqlite3-cli"
    }

    async fn schema_sql(&self, db: &Database) -> Result<String, QuarryError> {
        let snapshot_err = |source: BoxError| QuarryError::SchemaSnapshot { source };
        let path = db.settings().file_path().ok_or_else(|| {
            snapshot_err("an in-memory database cannot be dumped by the sqlite3 binary".into())
        })?;

        let output = Command::new(&self.binary)
            .arg(&path)
            .arg(".schema")
            .output()
            .await
            .map_err(|e| snapshot_err(Box::new(e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(snapshot_err(
                format!(
                    "{} exited with {}: {}",
                    self.binary.display(),
                    output.status,
                    stderr.trim()
                )
                .into(),
            ));
        }
        String::from_utf8(output.stdout).map_err(|e| snapshot_err(Box::new(e)))
    }
}

/// Build the introspector selected by `migrations.schema_dump`.
pub fn introspector_for(config: &MigrationsConfig) -> Box<dyn SchemaIntrospector> {
    match config.schema_dump {
        SchemaDumpMode::Native => Box::new(NativeIntrospector),
        SchemaDumpMode::Sqlite3Cli => Box::new(Sqlite3CliIntrospector::new(&config.sqlite3_bin)),
    }
}

/// Write `sql` to `path`, creating parent directories and overwriting.
pub async fn write_snapshot(path: &Path, sql: &str) -> Result<(), QuarryError> {
    let snapshot_err = |e: std::io::Error| QuarryError::SchemaSnapshot {
        source: Box::new(e),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(snapshot_err)?;
    }
    tokio::fs::write(path, sql).await.map_err(snapshot_err)?;
    info!(path = %path.display(), bytes = sql.len(), "schema snapshot written");
    Ok(())
}
