// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quarry - task runner for the single-writer SQLite access layer.
//!
//! Runs database tasks (`db:migrate`, `db:rollback`, ...) in the order given
//! on the command line against the configured database.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use quarry_storage::{Database, MigrationRunner};
use tracing::{error, info};

use crate::tasks::{Task, TaskContext};

/// Quarry - run database tasks in order.
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep running the remaining tasks after one fails.
    #[arg(long)]
    keep_going: bool,

    /// Tasks to run, in order.
    #[arg(value_enum, required = true, value_name = "TASK")]
    tasks: Vec<Task>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => quarry_config::load_and_validate_path(path),
        None => quarry_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            quarry_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    let db = Arc::new(Database::new(&config.storage, config.environment));
    if let Err(e) = db.ensure_connected().await {
        error!(error = %e, "database setup failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    info!(
        environment = %config.environment,
        database = %db.database_url(),
        "quarry started"
    );

    let runner = MigrationRunner::new(Arc::clone(&db), config.environment, &config.migrations);
    let ctx = TaskContext {
        config,
        db: Arc::clone(&db),
        runner,
    };

    let failures = tasks::run_all(&ctx, &cli.tasks, cli.keep_going).await;

    if let Err(e) = db.close().await {
        error!(error = %e, "failed to close database");
    }
    if failures > 0 {
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber with an env filter.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("quarry={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn tasks_parse_in_order() {
        let cli = Cli::try_parse_from(["quarry", "--keep-going", "db:migrate", "db:schema:dump"])
            .unwrap();
        assert!(cli.keep_going);
        assert_eq!(cli.tasks, vec![Task::Migrate, Task::SchemaDump]);
    }

    #[test]
    fn unknown_task_is_rejected() {
        assert!(Cli::try_parse_from(["quarry", "db:migrate", "db:nuke"]).is_err());
        assert!(Cli::try_parse_from(["quarry"]).is_err());
    }
}
