// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The write gate and everything that runs behind it.
//!
//! Every mutating call takes `Database::write_gate` before touching the write
//! handle and holds it until the statement, or the whole transaction including
//! the caller's unit of work, has finished. The guard is scoped, so it is
//! released on error and on unwind.
//!
//! The gate is not reentrant. A unit of work only ever sees a
//! `rusqlite::Transaction`, never the `Database`, so it cannot queue a second
//! gated write behind itself.

use std::panic;

use quarry_core::QuarryError;
use rusqlite::{Params, Transaction};
use tokio::sync::MutexGuard;
use tracing::{debug, warn};

use crate::database::{Database, PanicPayload, catch_panic, map_tr_err};

/// Outcome of a single mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: usize,
    /// Rowid of the most recent successful insert on the write handle.
    pub last_insert_rowid: i64,
}

impl Database {
    /// Execute one mutating statement on the write handle.
    ///
    /// Parameters must be owned (a tuple such as `(name, 42)`, or `()`), since
    /// the statement runs on the handle's background thread.
    pub async fn execute<P>(&self, sql: &str, params: P) -> Result<ExecResult, QuarryError>
    where
        P: Params + Send + 'static,
    {
        let _gate = self.write_gate.lock().await;
        let pair = self.pair().await?;
        let sql = sql.to_string();
        pair.writer
            .call(move |conn| {
                let rows_affected = conn.execute(&sql, params)?;
                Ok(ExecResult {
                    rows_affected,
                    last_insert_rowid: conn.last_insert_rowid(),
                })
            })
            .await
            .map_err(map_tr_err)
    }

    /// Execute several `;`-separated statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), QuarryError> {
        let _gate = self.write_gate.lock().await;
        let pair = self.pair().await?;
        let sql = sql.to_string();
        pair.writer
            .call(move |conn| conn.execute_batch(&sql))
            .await
            .map_err(map_tr_err)
    }

    /// Run `unit` inside a transaction on the write handle.
    ///
    /// The write gate is held from before `BEGIN` until after `COMMIT` or
    /// `ROLLBACK`, so the whole unit executes exclusive of any other write.
    /// If `unit` fails the transaction is rolled back and its error is returned
    /// unchanged. If it succeeds, a failed commit is reported as
    /// [`QuarryError::Commit`]. If it panics the transaction is rolled back,
    /// the gate released, and the panic resumed on the calling task; the
    /// write handle stays usable.
    pub async fn transaction<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<QuarryError> + Send + 'static,
    {
        let gate = self.write_gate.lock().await;
        let pair = self.pair().await?;
        let outcome = pair
            .writer
            .call(
                move |conn| -> Result<Result<Result<T, E>, PanicPayload>, rusqlite::Error> {
                    let tx = conn.transaction()?;
                    Ok(match catch_panic(|| unit(&tx)) {
                        Ok(Ok(value)) => Ok(match tx.commit() {
                            Ok(()) => Ok(value),
                            Err(e) => Err(E::from(QuarryError::Commit {
                                source: Box::new(e),
                            })),
                        }),
                        Ok(Err(err)) => {
                            roll_back(tx);
                            Ok(Err(err))
                        }
                        Err(payload) => {
                            warn!("unit of work panicked");
                            roll_back(tx);
                            Err(payload)
                        }
                    })
                },
            )
            .await
            .map_err(map_tr_err)?;
        drop(gate);
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Take the write gate for a span longer than one call.
    ///
    /// The migration runner holds it across a step and the schema snapshot
    /// that follows, so the snapshot sees exactly the schema the step left.
    pub(crate) async fn lock_writes(&self) -> WriteGuard<'_> {
        WriteGuard {
            _gate: self.write_gate.lock().await,
        }
    }

    /// Run `f` with exclusive use of the write connection.
    ///
    /// Used by the migration runner, whose steps manage their own transactions.
    /// A panic in `f` is resumed on the calling task; the guard is released
    /// as it unwinds.
    pub(crate) async fn with_write_connection<T, E, F>(
        &self,
        _gate: &WriteGuard<'_>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<QuarryError> + Send + 'static,
    {
        let pair = self.pair().await?;
        let outcome = pair
            .writer
            .call(move |conn| Ok::<_, rusqlite::Error>(catch_panic(|| f(conn))))
            .await
            .map_err(map_tr_err)?;
        outcome.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }
}

/// The held write gate.
pub(crate) struct WriteGuard<'a> {
    _gate: MutexGuard<'a, ()>,
}

fn roll_back(tx: Transaction<'_>) {
    match tx.rollback() {
        Ok(()) => debug!("transaction rolled back"),
        Err(e) => warn!(error = %e, "rollback after failed unit of work also failed"),
    }
}
