// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test database environments backed by a temp directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarry_config::model::{MigrationsConfig, QuarryConfig, StorageConfig};
use quarry_core::{Environment, QuarryError};
use quarry_storage::{Database, MigrationRunner};

/// Fixture migrations written by default: `(file stem, up sql, down sql)`.
pub const FIXTURE_MIGRATIONS: &[(&str, &str, &str)] = &[
    (
        "1_create_counters",
        "CREATE TABLE counters (\n    name TEXT PRIMARY KEY,\n    hits INTEGER NOT NULL DEFAULT 0\n);\nINSERT INTO counters (name, hits) VALUES ('visits', 0);\n",
        "DROP TABLE counters;\n",
    ),
    (
        "2_create_notes",
        "CREATE TABLE notes (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    body TEXT NOT NULL\n);\n",
        "DROP TABLE notes;\n",
    ),
    (
        "3_index_notes",
        "CREATE INDEX notes_body ON notes (body);\n",
        "DROP INDEX notes_body;\n",
    ),
];

/// Builder for [`TestDatabase`].
pub struct TestDatabaseBuilder {
    environment: Environment,
    readers: Option<usize>,
    migrations: Vec<(String, String, Option<String>)>,
    migrate: bool,
}

impl TestDatabaseBuilder {
    fn new() -> Self {
        Self {
            environment: Environment::Development,
            readers: None,
            migrations: FIXTURE_MIGRATIONS
                .iter()
                .map(|(stem, up, down)| (stem.to_string(), up.to_string(), Some(down.to_string())))
                .collect(),
            migrate: false,
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Size of the read pool.
    pub fn readers(mut self, readers: usize) -> Self {
        self.readers = Some(readers);
        self
    }

    /// Replace the fixture migrations. `stem` is `{version}_{title}`.
    pub fn migrations<I>(mut self, migrations: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Option<String>)>,
    {
        self.migrations = migrations.into_iter().collect();
        self
    }

    /// Apply all migrations during `build`.
    pub fn migrated(mut self) -> Self {
        self.migrate = true;
        self
    }

    pub async fn build(self) -> Result<TestDatabase, QuarryError> {
        let temp_dir = tempfile::TempDir::new().map_err(QuarryError::storage)?;
        let root = temp_dir.path();

        let migrations_dir = root.join("db").join("migrations");
        std::fs::create_dir_all(&migrations_dir).map_err(QuarryError::storage)?;
        for (stem, up, down) in &self.migrations {
            std::fs::write(migrations_dir.join(format!("{stem}.up.sql")), up)
                .map_err(QuarryError::storage)?;
            if let Some(down) = down {
                std::fs::write(migrations_dir.join(format!("{stem}.down.sql")), down)
                    .map_err(QuarryError::storage)?;
            }
        }

        let config = QuarryConfig {
            environment: self.environment,
            storage: StorageConfig {
                database_url: Some(root.join("test.sqlite3").display().to_string()),
                data_dir: root.join("data").display().to_string(),
                max_read_connections: self.readers,
                recovery_pause_ms: 20,
                ..StorageConfig::default()
            },
            migrations: MigrationsConfig {
                dir: migrations_dir.display().to_string(),
                schema_path: root.join("db").join("schema.sql").display().to_string(),
                ..MigrationsConfig::default()
            },
            ..QuarryConfig::default()
        };

        let db = Arc::new(Database::new(&config.storage, config.environment));
        let harness = TestDatabase {
            db,
            config,
            temp_dir,
        };
        if self.migrate {
            harness.runner().migrate().await?;
            tracing::debug!("test database migrated");
        }
        Ok(harness)
    }
}

/// A database, its migrations and its snapshot path in a private temp directory.
pub struct TestDatabase {
    pub db: Arc<Database>,
    /// Config pointing at the temp directory; usable by the CLI task runner.
    pub config: QuarryConfig,
    temp_dir: tempfile::TempDir,
}

impl TestDatabase {
    pub fn builder() -> TestDatabaseBuilder {
        TestDatabaseBuilder::new()
    }

    /// A runner over this database using the harness migrations directory.
    pub fn runner(&self) -> MigrationRunner {
        MigrationRunner::new(
            Arc::clone(&self.db),
            self.config.environment,
            &self.config.migrations,
        )
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database_path(&self) -> PathBuf {
        self.root().join("test.sqlite3")
    }

    pub fn schema_path(&self) -> PathBuf {
        PathBuf::from(&self.config.migrations.schema_path)
    }
}
