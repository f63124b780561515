// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named tasks invoked from the command line.

use std::sync::Arc;

use clap::ValueEnum;
use quarry_config::QuarryConfig;
use quarry_core::QuarryError;
use quarry_storage::{Database, MigrationOutcome, MigrationRunner};
use tracing::{error, info, warn};

/// A task the runner can execute. The value names are the CLI spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display, strum::AsRefStr)]
pub enum Task {
    /// Apply every pending migration.
    #[value(name = "db:migrate")]
    #[strum(serialize = "db:migrate")]
    Migrate,
    /// Revert the most recent migration.
    #[value(name = "db:rollback")]
    #[strum(serialize = "db:rollback")]
    Rollback,
    /// Drop every table and view (refused in production).
    #[value(name = "db:drop")]
    #[strum(serialize = "db:drop")]
    Drop,
    /// Write the schema snapshot.
    #[value(name = "db:schema:dump")]
    #[strum(serialize = "db:schema:dump")]
    SchemaDump,
    /// Close and reopen every handle to recover from WAL corruption.
    #[value(name = "db:wal_cleanup")]
    #[strum(serialize = "db:wal_cleanup")]
    WalCleanup,
    /// Serve HTTP until interrupted.
    #[value(name = "serve")]
    #[strum(serialize = "serve")]
    Serve,
}

/// Everything a task may touch.
pub struct TaskContext {
    pub config: QuarryConfig,
    pub db: Arc<Database>,
    pub runner: MigrationRunner,
}

/// Run a single task. `_arg` is the free-form task argument; no task uses it yet.
pub async fn run(ctx: &TaskContext, task: Task, _arg: &str) -> Result<(), QuarryError> {
    match task {
        Task::Migrate => report(ctx.runner.migrate().await?),
        Task::Rollback => report(ctx.runner.rollback().await?),
        Task::Drop => report(ctx.runner.drop_all().await?),
        Task::SchemaDump => {
            ctx.runner.dump_schema().await?;
            info!(path = %ctx.runner.schema_path().display(), "schema dumped");
        }
        Task::WalCleanup => ctx.db.recover_from_wal_corruption().await?,
        Task::Serve => crate::serve::run(ctx).await?,
    }
    Ok(())
}

/// Run `tasks` in order. Stops at the first failure unless `keep_going`.
///
/// Returns the number of failed tasks.
pub async fn run_all(ctx: &TaskContext, tasks: &[Task], keep_going: bool) -> usize {
    let mut failures = 0;
    for (i, &task) in tasks.iter().enumerate() {
        info!(task = %task, "running task");
        match run(ctx, task, task.as_ref()).await {
            Ok(()) => info!(task = %task, "task finished"),
            Err(e) => {
                failures += 1;
                error!(task = %task, error = %e, "task failed");
                eprintln!("{task}: {e}");
                if !keep_going {
                    let skipped = tasks.len() - i - 1;
                    if skipped > 0 {
                        warn!(skipped, "stopping after failed task");
                    }
                    break;
                }
            }
        }
    }
    failures
}

fn report(outcome: MigrationOutcome) {
    match outcome {
        MigrationOutcome::NoChange { version } => {
            println!("no pending changes (version {})", display_version(version));
        }
        MigrationOutcome::Applied { from, to, steps } => {
            println!(
                "migrated {} -> {to} ({steps} step(s))",
                display_version(from)
            );
        }
        MigrationOutcome::RolledBack { from, to } => {
            println!("rolled back {from} -> {}", display_version(to));
        }
        MigrationOutcome::Dropped { objects } => {
            println!("dropped {objects} schema object(s)");
        }
    }
}

fn display_version(version: Option<u64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}
