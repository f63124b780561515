// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read operations served by the read pool.
//!
//! Reads never touch the write gate; up to `readers` of them run at once.
//! Each read honours its [`QueryContext`]: on cancellation or deadline expiry
//! the running statement is interrupted and the caller gets
//! `QuarryError::Cancelled` or `QuarryError::Timeout`.

use std::panic;

use quarry_core::QuarryError;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Params, Row};

use crate::context::QueryContext;
use crate::database::{Database, catch_panic, map_tr_err};

/// Map one result row onto a type.
///
/// ```
/// use quarry_storage::FromRow;
///
/// struct Note {
///     id: i64,
///     body: String,
/// }
///
/// impl FromRow for Note {
///     fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
///         Ok(Note { id: row.get("id")?, body: row.get("body")? })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Untyped result set: column names plus one `Value` per cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RawRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

impl Database {
    /// Fetch at most one row, mapped with `map`. `None` when the query returns nothing.
    pub async fn query_row<T, P, F>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> Result<Option<T>, QuarryError>
    where
        T: Send + 'static,
        P: Params + Send + 'static,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        let sql = sql.to_string();
        self.read(ctx, move |conn| {
            conn.query_row(&sql, params, map).optional()
        })
        .await
    }

    /// Fetch at most one row into a [`FromRow`] type.
    pub async fn query_row_as<T, P>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
    ) -> Result<Option<T>, QuarryError>
    where
        T: FromRow + Send + 'static,
        P: Params + Send + 'static,
    {
        self.query_row(ctx, sql, params, T::from_row).await
    }

    /// Fetch every row as raw values.
    pub async fn query<P>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
    ) -> Result<RawRows, QuarryError>
    where
        P: Params + Send + 'static,
    {
        let sql = sql.to_string();
        self.read(ctx, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();
            let rows = stmt
                .query_map(params, |row| {
                    (0..width)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<Vec<Value>>>()
                })?
                .collect::<rusqlite::Result<Vec<Vec<Value>>>>()?;
            Ok(RawRows { columns, rows })
        })
        .await
    }

    /// Fetch every row into a [`FromRow`] type.
    pub async fn query_as<T, P>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
    ) -> Result<Vec<T>, QuarryError>
    where
        T: FromRow + Send + 'static,
        P: Params + Send + 'static,
    {
        let sql = sql.to_string();
        self.read(ctx, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params, T::from_row)?
                .collect::<rusqlite::Result<Vec<T>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Append every row, mapped through [`FromRow`], to `dest`.
    ///
    /// Returns how many rows were appended. `dest` is left untouched on error.
    pub async fn select_into<T, P>(
        &self,
        ctx: &QueryContext,
        dest: &mut Vec<T>,
        sql: &str,
        params: P,
    ) -> Result<usize, QuarryError>
    where
        T: FromRow + Send + 'static,
        P: Params + Send + 'static,
    {
        let rows = self.query_as::<T, P>(ctx, sql, params).await?;
        let count = rows.len();
        dest.extend(rows);
        Ok(count)
    }

    /// Run `f` on a leased read handle, racing it against the context.
    ///
    /// The lease travels with the closure, so the handle only returns to the
    /// pool once its thread is done with it. A closure still queued when the
    /// context fires never starts its statement; one already running is
    /// interrupted.
    pub(crate) async fn read<R, F>(&self, ctx: &QueryContext, f: F) -> Result<R, QuarryError>
    where
        R: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
    {
        if ctx.is_done() {
            return Err(ctx.done().await);
        }
        let pair = self.pair().await?;

        let lease = tokio::select! {
            biased;
            reason = ctx.done() => return Err(reason),
            lease = pair.readers.checkout() => lease?,
        };
        let id = lease.id();
        let conn = lease.conn().clone();
        let scope = ctx.clone();
        let call = conn.call(move |conn| {
            let _lease = lease;
            if scope.is_done() {
                return Ok::<_, rusqlite::Error>(None);
            }
            Ok(Some(catch_panic(|| f(conn))))
        });

        let outcome = tokio::select! {
            biased;
            reason = ctx.done() => {
                pair.readers.interrupt(id);
                return Err(reason);
            }
            result = call => result.map_err(map_tr_err)?,
        };
        match outcome {
            Some(Ok(result)) => result.map_err(QuarryError::storage),
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => Err(ctx.done().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::database::ConnectionSettings;
    use tempfile::{TempDir, tempdir};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, PartialEq)]
    struct Note {
        id: i64,
        body: String,
    }

    impl FromRow for Note {
        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Note {
                id: row.get("id")?,
                body: row.get("body")?,
            })
        }
    }

    async fn notes_db(readers: usize) -> (Arc<Database>, TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::with_settings(ConnectionSettings {
            url: dir.path().join("reads.db").display().to_string(),
            busy_timeout: Duration::from_millis(5000),
            cache_size: -2000,
            readers,
            recovery_pause: Duration::from_millis(10),
        });
        db.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);
             INSERT INTO notes (body) VALUES ('first'), ('second'), ('third');",
        )
        .await
        .unwrap();
        (Arc::new(db), dir)
    }

    #[tokio::test]
    async fn query_row_returns_none_for_no_rows() {
        let (db, _dir) = notes_db(2).await;
        let ctx = QueryContext::background();
        let missing: Option<String> = db
            .query_row(&ctx, "SELECT body FROM notes WHERE id = ?1", (99,), |r| r.get(0))
            .await
            .unwrap();
        assert!(missing.is_none());

        let note: Option<Note> = db
            .query_row_as(&ctx, "SELECT id, body FROM notes WHERE id = ?1", (2,))
            .await
            .unwrap();
        assert_eq!(
            note,
            Some(Note {
                id: 2,
                body: "second".into()
            })
        );
    }

    #[tokio::test]
    async fn raw_query_keeps_column_names() {
        let (db, _dir) = notes_db(2).await;
        let rows = db
            .query(
                &QueryContext::background(),
                "SELECT id, body FROM notes ORDER BY id",
                (),
            )
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "body"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.column("body"), Some(1));
        assert_eq!(rows.rows[0][1], Value::Text("first".into()));
        assert_eq!(rows.rows[2][0], Value::Integer(3));
    }

    #[tokio::test]
    async fn select_into_appends_to_destination() {
        let (db, _dir) = notes_db(2).await;
        let mut dest = vec![Note {
            id: 0,
            body: "existing".into(),
        }];
        let appended = db
            .select_into(
                &QueryContext::background(),
                &mut dest,
                "SELECT id, body FROM notes WHERE id > ?1 ORDER BY id",
                (1,),
            )
            .await
            .unwrap();
        assert_eq!(appended, 2);
        assert_eq!(dest.len(), 3);
        assert_eq!(dest[0].body, "existing");
        assert_eq!(dest[2].body, "third");
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let (db, _dir) = notes_db(2).await;
        let token = CancellationToken::new();
        token.cancel();
        let ctx = QueryContext::background().with_cancellation(token);
        let err = db.query(&ctx, "SELECT * FROM notes", ()).await.unwrap_err();
        assert!(matches!(err, QuarryError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deadline_interrupts_long_query() {
        let (db, _dir) = notes_db(2).await;
        let ctx = QueryContext::background().with_timeout(Duration::from_millis(50));
        // Unbounded recursive CTE: only an interrupt stops it.
        let err = db
            .query_row(
                &ctx,
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
                 SELECT count(*) FROM n",
                (),
                |r| r.get::<_, i64>(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::Timeout { .. }), "got {err:?}");

        // The interrupted handle is usable again afterwards.
        let count: Option<i64> = db
            .query_row(
                &QueryContext::background(),
                "SELECT count(*) FROM notes",
                (),
                |r| r.get(0),
            )
            .await
            .unwrap();
        assert_eq!(count, Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_read_keeps_its_handle_until_the_statement_ends() {
        let (db, _dir) = notes_db(1).await;
        let ctx = QueryContext::background().with_timeout(Duration::from_millis(50));
        let err = db
            .query_row(
                &ctx,
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
                 SELECT count(*) FROM n",
                (),
                |r| r.get::<_, i64>(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::Timeout { .. }), "got {err:?}");

        // The single handle comes back once the interrupted statement unwinds.
        let mut idle = db.idle_readers().await;
        for _ in 0..100 {
            if idle == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            idle = db.idle_readers().await;
        }
        assert_eq!(idle, Some(1));

        let bodies = db
            .query_as::<Note, _>(&QueryContext::background(), "SELECT id, body FROM notes", ())
            .await
            .unwrap();
        assert_eq!(bodies.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_row_mapper_reaches_the_caller_and_spares_the_reader() {
        let (db, _dir) = notes_db(1).await;

        let reader = Arc::clone(&db);
        let joined = tokio::spawn(async move {
            reader
                .query_row(
                    &QueryContext::background(),
                    "SELECT body FROM notes WHERE id = 1",
                    (),
                    |_row| -> rusqlite::Result<String> { panic!("mapper exploded") },
                )
                .await
        })
        .await;
        let payload = joined.unwrap_err().into_panic();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"mapper exploded"));

        assert!(db.is_connected().await);
        assert_eq!(db.idle_readers().await, Some(1));
        let body: Option<String> = db
            .query_row(
                &QueryContext::background(),
                "SELECT body FROM notes WHERE id = 1",
                (),
                |r| r.get(0),
            )
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("first"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_run_concurrently_up_to_the_ceiling() {
        let (db, _dir) = notes_db(3).await;
        assert_eq!(db.read_concurrency().await, Some(3));

        let tasks = (0..12).map(|_| {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.query_as::<Note, _>(&QueryContext::background(), "SELECT id, body FROM notes", ())
                    .await
            })
        });
        for joined in futures::future::join_all(tasks).await {
            assert_eq!(joined.unwrap().unwrap().len(), 3);
        }
        assert_eq!(db.idle_readers().await, Some(3));
    }
}
