// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Migrate, rollback, drop and schema snapshots on top of [`Database`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarry_config::model::MigrationsConfig;
use quarry_core::{Environment, MigrationPhase, QuarryError};
use tracing::{info, warn};

use crate::context::QueryContext;
use crate::database::Database;
use crate::migrations::{self, MigrationEngineError, MigrationOutcome, MigrationSet};
use crate::snapshot::{SchemaIntrospector, introspector_for, write_snapshot};

/// Where migrations come from.
#[derive(Debug, Clone)]
enum MigrationSource {
    Dir(PathBuf),
    Set(MigrationSet),
}

impl MigrationSource {
    fn load(&self) -> Result<MigrationSet, MigrationEngineError> {
        match self {
            MigrationSource::Dir(dir) => MigrationSet::from_dir(dir),
            MigrationSource::Set(set) => Ok(set.clone()),
        }
    }
}

/// Applies and reverts versioned migrations against a shared [`Database`].
///
/// Every step goes through the write gate, so migrations never interleave
/// with application writes.
pub struct MigrationRunner {
    db: Arc<Database>,
    environment: Environment,
    source: MigrationSource,
    schema_path: PathBuf,
    introspector: Box<dyn SchemaIntrospector>,
}

impl MigrationRunner {
    pub fn new(db: Arc<Database>, environment: Environment, config: &MigrationsConfig) -> Self {
        Self {
            db,
            environment,
            source: MigrationSource::Dir(PathBuf::from(&config.dir)),
            schema_path: PathBuf::from(&config.schema_path),
            introspector: introspector_for(config),
        }
    }

    /// Use an in-memory migration set instead of the configured directory.
    pub fn with_migrations(mut self, set: MigrationSet) -> Self {
        self.source = MigrationSource::Set(set);
        self
    }

    pub fn with_introspector(mut self, introspector: Box<dyn SchemaIntrospector>) -> Self {
        self.introspector = introspector;
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    /// Apply every pending migration, then snapshot the schema outside production.
    pub async fn migrate(&self) -> Result<MigrationOutcome, QuarryError> {
        self.db.ensure_connected().await?;
        let phase = MigrationPhase::Migrate;
        let set = self.source.load().map_err(|e| QuarryError::migration(phase, e))?;

        let gate = self.db.lock_writes().await;
        let outcome = self
            .db
            .with_write_connection(&gate, move |conn| migrations::apply_pending(conn, &set))
            .await
            .map_err(|e| QuarryError::migration(phase, e))?;

        match outcome {
            MigrationOutcome::NoChange { version } => {
                info!(version = ?version, "no pending migrations");
            }
            MigrationOutcome::Applied { from, to, steps } => {
                info!(from = ?from, to, steps, "database migrated");
            }
            _ => {}
        }
        self.snapshot_unless_production().await?;
        drop(gate);
        Ok(outcome)
    }

    /// Revert the most recently applied migration.
    pub async fn rollback(&self) -> Result<MigrationOutcome, QuarryError> {
        self.db.ensure_connected().await?;
        let phase = MigrationPhase::Rollback;
        let set = self.source.load().map_err(|e| QuarryError::migration(phase, e))?;

        let gate = self.db.lock_writes().await;
        let outcome = self
            .db
            .with_write_connection(&gate, move |conn| migrations::revert_one(conn, &set))
            .await
            .map_err(|e| QuarryError::migration(phase, e))?;

        info!(outcome = ?outcome, "database rolled back");
        self.snapshot_unless_production().await?;
        drop(gate);
        Ok(outcome)
    }

    /// Drop every user table and view. Refused in production before any I/O.
    pub async fn drop_all(&self) -> Result<MigrationOutcome, QuarryError> {
        let phase = MigrationPhase::Drop;
        if self.environment.is_production() {
            return Err(QuarryError::migration(
                phase,
                QuarryError::ForbiddenInProduction {
                    environment: self.environment,
                },
            ));
        }

        self.db.ensure_connected().await?;
        let gate = self.db.lock_writes().await;
        let objects = self
            .db
            .with_write_connection(&gate, migrations::drop_everything)
            .await
            .map_err(|e| QuarryError::migration(phase, e))?;

        warn!(objects, database = %self.db.database_url(), "database schema dropped");
        self.dump_schema().await?;
        drop(gate);
        Ok(MigrationOutcome::Dropped { objects })
    }

    /// The applied migration version, `None` when unmigrated.
    pub async fn status(&self) -> Result<Option<u64>, QuarryError> {
        self.db
            .read(&QueryContext::background(), |conn| {
                migrations::current_version(conn)
            })
            .await
    }

    /// Write the current schema to the snapshot path.
    pub async fn dump_schema(&self) -> Result<(), QuarryError> {
        self.db.ensure_connected().await?;
        let sql = self.introspector.schema_sql(&self.db).await?;
        write_snapshot(&self.schema_path, &sql).await
    }

    /// Called with the write gate still held, so no other migrate, drop or
    /// write lands between the step and the snapshot. The introspector only
    /// reads, so it never waits on the gate itself.
    async fn snapshot_unless_production(&self) -> Result<(), QuarryError> {
        if self.environment.is_production() {
            info!(environment = %self.environment, "skipping schema snapshot");
            return Ok(());
        }
        self.dump_schema().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::database::ConnectionSettings;
    use crate::migrations::Migration;
    use crate::snapshot::NativeIntrospector;
    use tempfile::{TempDir, tempdir};

    fn fixture_set() -> MigrationSet {
        MigrationSet::new(vec![
            Migration {
                version: 1,
                name: "create_counters".into(),
                up: "CREATE TABLE counters (name TEXT PRIMARY KEY, hits INTEGER NOT NULL DEFAULT 0);"
                    .into(),
                down: Some("DROP TABLE counters;".into()),
            },
            Migration {
                version: 2,
                name: "create_notes".into(),
                up: "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL);"
                    .into(),
                down: Some("DROP TABLE notes;".into()),
            },
        ])
        .unwrap()
    }

    fn runner(environment: Environment) -> (MigrationRunner, TempDir) {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::with_settings(ConnectionSettings {
            url: dir.path().join("runner.db").display().to_string(),
            busy_timeout: Duration::from_millis(1000),
            cache_size: -2000,
            readers: 2,
            recovery_pause: Duration::from_millis(10),
        }));
        let config = MigrationsConfig {
            dir: dir.path().join("migrations").display().to_string(),
            schema_path: dir.path().join("db").join("schema.sql").display().to_string(),
            ..MigrationsConfig::default()
        };
        let runner = MigrationRunner::new(db, environment, &config).with_migrations(fixture_set());
        (runner, dir)
    }

    #[tokio::test]
    async fn migrate_is_idempotent_and_snapshots() {
        let (runner, _dir) = runner(Environment::Development);

        let first = runner.migrate().await.unwrap();
        assert_eq!(
            first,
            MigrationOutcome::Applied {
                from: None,
                to: 2,
                steps: 2
            }
        );
        let second = runner.migrate().await.unwrap();
        assert_eq!(second, MigrationOutcome::NoChange { version: Some(2) });
        assert_eq!(runner.status().await.unwrap(), Some(2));

        let schema = std::fs::read_to_string(runner.schema_path()).unwrap();
        assert!(schema.contains("CREATE TABLE counters"));
        assert!(schema.contains("CREATE TABLE notes"));
    }

    /// Attempts a competing write while the snapshot is taken.
    struct ContendedIntrospector {
        write_blocked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SchemaIntrospector for ContendedIntrospector {
        fn name(&self) -> &str {
            "contended"
        }

        async fn schema_sql(&self, db: &Database) -> Result<String, QuarryError> {
            let competing = db.execute_batch("CREATE TABLE intruder (id INTEGER)");
            let blocked = tokio::time::timeout(Duration::from_millis(100), competing)
                .await
                .is_err();
            self.write_blocked.store(blocked, Ordering::SeqCst);
            NativeIntrospector.schema_sql(db).await
        }
    }

    #[tokio::test]
    async fn snapshot_is_taken_before_other_writes_resume() {
        let (runner, _dir) = runner(Environment::Development);
        let write_blocked = Arc::new(AtomicBool::new(false));
        let runner = runner.with_introspector(Box::new(ContendedIntrospector {
            write_blocked: Arc::clone(&write_blocked),
        }));

        runner.migrate().await.unwrap();
        assert!(write_blocked.load(Ordering::SeqCst), "gate released before snapshot");
        let schema = std::fs::read_to_string(runner.schema_path()).unwrap();
        assert!(schema.contains("CREATE TABLE notes"));
        assert!(!schema.contains("intruder"));

        write_blocked.store(false, Ordering::SeqCst);
        runner.rollback().await.unwrap();
        assert!(write_blocked.load(Ordering::SeqCst));

        write_blocked.store(false, Ordering::SeqCst);
        runner.drop_all().await.unwrap();
        assert!(write_blocked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn production_migrate_skips_snapshot() {
        let (runner, _dir) = runner(Environment::Production);
        runner.migrate().await.unwrap();
        assert!(!runner.schema_path().exists());
    }

    #[tokio::test]
    async fn rollback_steps_back_and_fails_when_empty() {
        let (runner, _dir) = runner(Environment::Development);
        runner.migrate().await.unwrap();

        let outcome = runner.rollback().await.unwrap();
        assert_eq!(outcome, MigrationOutcome::RolledBack { from: 2, to: Some(1) });
        let schema = std::fs::read_to_string(runner.schema_path()).unwrap();
        assert!(!schema.contains("notes"));

        runner.rollback().await.unwrap();
        assert_eq!(runner.status().await.unwrap(), None);

        let err = runner.rollback().await.unwrap_err();
        assert_eq!(err.phase(), Some(MigrationPhase::Rollback));
        assert!(err.to_string().contains("no migration has been applied"));
    }

    #[tokio::test]
    async fn drop_is_refused_in_production_without_touching_the_file() {
        let (runner, dir) = runner(Environment::Production);
        let err = runner.drop_all().await.unwrap_err();

        assert_eq!(err.phase(), Some(MigrationPhase::Drop));
        assert!(err.is_forbidden_in_production());
        assert!(!dir.path().join("runner.db").exists(), "no I/O before refusal");
    }

    #[tokio::test]
    async fn drop_clears_schema_and_marker() {
        let (runner, _dir) = runner(Environment::Staging);
        runner.migrate().await.unwrap();

        let outcome = runner.drop_all().await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Dropped { objects: 3 });
        assert_eq!(runner.status().await.unwrap(), None);

        // A fresh migrate starts from scratch.
        let again = runner.migrate().await.unwrap();
        assert!(matches!(again, MigrationOutcome::Applied { from: None, .. }));
    }

    #[tokio::test]
    async fn missing_source_dir_is_a_migrate_failure() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::with_settings(ConnectionSettings {
            url: dir.path().join("m.db").display().to_string(),
            busy_timeout: Duration::from_millis(1000),
            cache_size: -2000,
            readers: 1,
            recovery_pause: Duration::from_millis(10),
        }));
        let config = MigrationsConfig {
            dir: dir.path().join("absent").display().to_string(),
            ..MigrationsConfig::default()
        };
        let err = MigrationRunner::new(db, Environment::Development, &config)
            .migrate()
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(MigrationPhase::Migrate));
    }
}
