// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned SQL migrations with up and down steps.
//!
//! Migrations live in a directory as `{version}_{title}.up.sql` and
//! `{version}_{title}.down.sql`. The applied version is recorded in the
//! single-row `schema_migrations` table. Every step runs in its own
//! transaction together with the marker update, so the marker always names
//! exactly the last migration whose SQL committed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use quarry_core::QuarryError;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the table holding the applied-version marker.
pub const VERSION_TABLE: &str = "schema_migrations";

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([^.]+)\.(up|down)\.sql$").expect("migration file pattern is valid")
});

/// Failures of the migration engine itself. The runner wraps these with the
/// phase (migrate, rollback, drop) they happened in.
#[derive(Debug, Error)]
pub enum MigrationEngineError {
    #[error("failed to read migration source {path}: {source}")]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no migrations found in {0}")]
    EmptySource(PathBuf),

    #[error("migration version {0} is defined more than once")]
    DuplicateVersion(u64),

    #[error("migration {0} has a down step but no up step")]
    MissingUp(u64),

    #[error("migration {0} has no down step")]
    MissingDown(u64),

    /// Rollback was requested but nothing has been applied.
    #[error("no migration has been applied")]
    NoVersion,

    #[error("database is at version {0}, which is not in the migration source")]
    UnknownVersion(u64),

    /// The marker table holds a value no migration file could have produced.
    #[error("schema_migrations holds {0}, which is not a valid migration version")]
    InvalidVersion(i64),

    #[error("migration {version} ({name}) failed: {source}")]
    Step {
        version: u64,
        name: String,
        source: rusqlite::Error,
    },

    #[error("migration bookkeeping failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Access(#[from] QuarryError),
}

/// One versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub up: String,
    pub down: Option<String>,
}

/// An ordered, duplicate-free set of migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrationEngineError> {
        migrations.sort_by_key(|m| m.version);
        if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(MigrationEngineError::DuplicateVersion(pair[0].version));
        }
        Ok(Self { migrations })
    }

    /// Load every `*.up.sql` / `*.down.sql` pair from `dir`.
    ///
    /// Files that do not follow the naming scheme are skipped with a warning.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, MigrationEngineError> {
        let dir = dir.as_ref();
        let io_err = |path: &Path, source| MigrationEngineError::Source {
            path: path.to_path_buf(),
            source,
        };

        let mut ups: BTreeMap<u64, (String, String)> = BTreeMap::new();
        let mut downs: BTreeMap<u64, String> = BTreeMap::new();

        for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let path = entry.map_err(|e| io_err(dir, e))?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(caps) = FILE_NAME.captures(file_name) else {
                if file_name.ends_with(".sql") {
                    warn!(file = %path.display(), "ignoring misnamed migration file");
                }
                continue;
            };
            let version: u64 = caps[1]
                .parse()
                .map_err(|_| io_err(&path, std::io::Error::other("version out of range")))?;
            let sql = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;

            let duplicate = if &caps[3] == "up" {
                ups.insert(version, (caps[2].to_string(), sql)).is_some()
            } else {
                downs.insert(version, sql).is_some()
            };
            if duplicate {
                return Err(MigrationEngineError::DuplicateVersion(version));
            }
        }

        if let Some(&orphan) = downs.keys().find(|v| !ups.contains_key(v)) {
            return Err(MigrationEngineError::MissingUp(orphan));
        }
        if ups.is_empty() {
            return Err(MigrationEngineError::EmptySource(dir.to_path_buf()));
        }

        let migrations = ups
            .into_iter()
            .map(|(version, (name, up))| Migration {
                version,
                name,
                up,
                down: downs.remove(&version),
            })
            .collect();
        debug!(dir = %dir.display(), "migration source loaded");
        Self::new(migrations)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn latest(&self) -> Option<u64> {
        self.migrations.last().map(|m| m.version)
    }

    pub fn get(&self, version: u64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|i| &self.migrations[i])
    }

    /// The version applied before `version`, `None` if it is the first.
    pub fn previous(&self, version: u64) -> Option<u64> {
        self.migrations
            .iter()
            .rev()
            .map(|m| m.version)
            .find(|&v| v < version)
    }

    /// Migrations newer than `current`, ascending.
    pub fn pending(&self, current: Option<u64>) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .filter(move |m| current.is_none_or(|c| m.version > c))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }
}

/// What a runner operation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing to do; the marker was left at `version`.
    NoChange { version: Option<u64> },
    Applied {
        from: Option<u64>,
        to: u64,
        steps: usize,
    },
    RolledBack { from: u64, to: Option<u64> },
    Dropped { objects: usize },
}

/// Current applied version, `None` when unmigrated. Does not create the marker table.
///
/// A negative marker fails with [`rusqlite::Error::IntegralValueOutOfRange`].
pub fn current_version(conn: &Connection) -> rusqlite::Result<Option<u64>> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        (VERSION_TABLE,),
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(None);
    }
    let version: Option<i64> = conn
        .query_row(
            &format!("SELECT version FROM {VERSION_TABLE} LIMIT 1"),
            (),
            |row| row.get(0),
        )
        .optional()?;
    version
        .map(|v| u64::try_from(v).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, v)))
        .transpose()
}

/// [`current_version`] with an out-of-range marker reported as such.
fn stored_version(conn: &Connection) -> Result<Option<u64>, MigrationEngineError> {
    current_version(conn).map_err(|e| match e {
        rusqlite::Error::IntegralValueOutOfRange(_, v) => MigrationEngineError::InvalidVersion(v),
        e => e.into(),
    })
}

fn set_version(tx: &Transaction<'_>, version: Option<u64>) -> rusqlite::Result<()> {
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (version INTEGER NOT NULL PRIMARY KEY);
         DELETE FROM {VERSION_TABLE};"
    ))?;
    if let Some(version) = version {
        tx.execute(
            &format!("INSERT INTO {VERSION_TABLE} (version) VALUES (?1)"),
            (version,),
        )?;
    }
    Ok(())
}

fn run_step(
    conn: &mut Connection,
    migration: &Migration,
    sql: &str,
    target: Option<u64>,
) -> Result<(), MigrationEngineError> {
    let step_err = |source| MigrationEngineError::Step {
        version: migration.version,
        name: migration.name.clone(),
        source,
    };
    let tx = conn.transaction()?;
    tx.execute_batch(sql).map_err(step_err)?;
    set_version(&tx, target)?;
    tx.commit()?;
    Ok(())
}

/// Apply every pending migration in ascending order.
pub fn apply_pending(
    conn: &mut Connection,
    set: &MigrationSet,
) -> Result<MigrationOutcome, MigrationEngineError> {
    let from = stored_version(conn)?;
    if let Some(v) = from
        && set.get(v).is_none()
    {
        return Err(MigrationEngineError::UnknownVersion(v));
    }

    let mut steps = 0;
    let mut to = from;
    for migration in set.pending(from) {
        run_step(conn, migration, &migration.up, Some(migration.version))?;
        info!(version = migration.version, name = %migration.name, "migration applied");
        steps += 1;
        to = Some(migration.version);
    }

    match to {
        Some(to) if steps > 0 => Ok(MigrationOutcome::Applied { from, to, steps }),
        _ => Ok(MigrationOutcome::NoChange { version: from }),
    }
}

/// Revert exactly the most recently applied migration.
pub fn revert_one(
    conn: &mut Connection,
    set: &MigrationSet,
) -> Result<MigrationOutcome, MigrationEngineError> {
    let from = stored_version(conn)?.ok_or(MigrationEngineError::NoVersion)?;
    let migration = set
        .get(from)
        .ok_or(MigrationEngineError::UnknownVersion(from))?;
    let down = migration
        .down
        .as_deref()
        .ok_or(MigrationEngineError::MissingDown(from))?;

    let to = set.previous(from);
    run_step(conn, migration, down, to)?;
    info!(version = from, name = %migration.name, "migration reverted");
    Ok(MigrationOutcome::RolledBack { from, to })
}

/// Drop every table and view that is not SQLite-internal, marker table included.
///
/// Indexes and triggers go with their tables. Returns how many objects were dropped.
pub fn drop_everything(conn: &mut Connection) -> Result<usize, MigrationEngineError> {
    let foreign_keys: bool = conn.query_row("PRAGMA foreign_keys", (), |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", false)?;

    let dropped = drop_objects(conn);

    conn.pragma_update(None, "foreign_keys", foreign_keys)?;
    let dropped = dropped?;
    conn.execute_batch("VACUUM")?;
    Ok(dropped)
}

fn drop_objects(conn: &mut Connection) -> Result<usize, MigrationEngineError> {
    let tx = conn.transaction()?;
    let objects: Vec<(String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT type, name FROM sqlite_master
             WHERE type IN ('view', 'table') AND substr(name, 1, 7) != 'sqlite_'
             ORDER BY type = 'table', name",
        )?;
        stmt.query_map((), |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?
    };

    for (kind, name) in &objects {
        let quoted = name.replace('"', "\"\"");
        let sql = if kind == "view" {
            format!("DROP VIEW IF EXISTS \"{quoted}\"")
        } else {
            format!("DROP TABLE IF EXISTS \"{quoted}\"")
        };
        tx.execute_batch(&sql)?;
        debug!(kind = %kind, name = %name, "dropped schema object");
    }

    let has_sequence: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE name = 'sqlite_sequence')",
        (),
        |row| row.get(0),
    )?;
    if has_sequence {
        tx.execute_batch("DELETE FROM sqlite_sequence")?;
    }

    tx.commit()?;
    Ok(objects.len())
}
