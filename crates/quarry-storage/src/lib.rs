// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-writer/multi-reader access to one SQLite database file.
//!
//! A [`Database`] owns a dedicated write connection and a small pool of
//! read-only connections, both in WAL mode. Writes, transactions and
//! migrations are serialized by a gate owned by the handle; reads run in
//! parallel up to the pool size and honour a [`QueryContext`].
//!
//! [`MigrationRunner`] applies versioned `.up.sql` / `.down.sql` files and
//! keeps a schema snapshot next to them outside production.

pub mod context;
pub mod database;
pub mod migrations;
mod pool;
pub mod reads;
pub mod runner;
pub mod snapshot;
pub mod writer;

pub use context::QueryContext;
pub use database::{ConnectionSettings, Database};
pub use migrations::{Migration, MigrationEngineError, MigrationOutcome, MigrationSet};
pub use reads::{FromRow, RawRows};
pub use runner::MigrationRunner;
pub use snapshot::{NativeIntrospector, SchemaIntrospector, Sqlite3CliIntrospector};
pub use writer::ExecResult;
