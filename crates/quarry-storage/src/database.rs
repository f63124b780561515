// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! A [`Database`] owns one write handle and a bounded pool of read handles, all
//! opened lazily against the same file. The pair can be closed and reopened
//! (shutdown, WAL recovery) without rebuilding the `Database` itself.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quarry_config::model::StorageConfig;
use quarry_core::{BoxError, Environment, QuarryError};
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::pool::{ReadHandle, ReadPool};

/// Convert a tokio-rusqlite error into QuarryError::Storage.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> QuarryError {
    QuarryError::Storage {
        source: Box::new(e),
    }
}

/// Payload of a panic caught on a connection thread.
pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// Run caller code on a connection thread without letting a panic unwind
/// through it. An unwound tokio-rusqlite thread takes its connection with it,
/// so the payload is handed back instead and re-raised on the calling task
/// with [`panic::resume_unwind`] once every guard has been released.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, PanicPayload> {
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Resolved connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// SQLite connection string, a path or a `file:` URI.
    pub url: String,
    pub busy_timeout: Duration,
    pub cache_size: i64,
    /// Read handle count, the read concurrency ceiling.
    pub readers: usize,
    /// Pause between close and reopen during WAL recovery.
    pub recovery_pause: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &StorageConfig, environment: Environment) -> Self {
        Self {
            url: config.database_url(environment),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            cache_size: config.cache_size,
            readers: config
                .max_read_connections
                .unwrap_or_else(default_readers)
                .max(1),
            recovery_pause: Duration::from_millis(config.recovery_pause_ms),
        }
    }

    /// Filesystem path behind the connection string, if it names a file.
    pub fn file_path(&self) -> Option<PathBuf> {
        let path = self.url.strip_prefix("file:").unwrap_or(&self.url);
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

fn default_readers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// The write handle and the read pool, both pointing at the same file.
pub(crate) struct ConnectionPair {
    pub(crate) writer: tokio_rusqlite::Connection,
    pub(crate) readers: Arc<ReadPool>,
}

impl ConnectionPair {
    async fn open(settings: &ConnectionSettings) -> Result<Self, QuarryError> {
        let file_path = settings.file_path();
        if let Some(parent) = file_path.as_deref().and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| connect_err(settings, e))?;
        }

        // Writer first: it is the handle that switches the file to WAL.
        let writer = open_handle(settings, false).await?;

        let mut handles = Vec::with_capacity(settings.readers);
        for _ in 0..settings.readers {
            let conn = open_handle(settings, true).await?;
            let interrupt = conn
                .call(|conn| Ok::<_, rusqlite::Error>(conn.get_interrupt_handle()))
                .await
                .map_err(|e| connect_err(settings, e))?;
            handles.push(ReadHandle::new(conn, interrupt));
        }

        Ok(Self {
            writer,
            readers: ReadPool::new(handles),
        })
    }

    /// Close every handle, attempting all of them.
    async fn close(&self) -> Vec<BoxError> {
        let mut errors: Vec<BoxError> = Vec::new();
        if let Err(e) = self.writer.clone().close().await {
            errors.push(Box::new(e));
        }
        errors.extend(self.readers.close().await);
        errors
    }
}

fn connect_err(
    settings: &ConnectionSettings,
    source: impl std::error::Error + Send + Sync + 'static,
) -> QuarryError {
    QuarryError::Connect {
        path: settings.url.clone(),
        source: Box::new(source),
    }
}

async fn open_handle(
    settings: &ConnectionSettings,
    query_only: bool,
) -> Result<tokio_rusqlite::Connection, QuarryError> {
    let conn = tokio_rusqlite::Connection::open(&settings.url)
        .await
        .map_err(|e| connect_err(settings, e))?;

    let busy_timeout = settings.busy_timeout;
    let cache_size = settings.cache_size;
    let journal_mode = conn
        .call(move |conn| apply_pragmas(conn, busy_timeout, cache_size, query_only))
        .await
        .map_err(|e| connect_err(settings, e))?;

    if !journal_mode.eq_ignore_ascii_case("wal") {
        warn!(url = %settings.url, journal_mode = %journal_mode, "database is not in WAL mode");
    }
    Ok(conn)
}

/// Durability and performance settings applied to every handle.
fn apply_pragmas(
    conn: &mut rusqlite::Connection,
    busy_timeout: Duration,
    cache_size: i64,
    query_only: bool,
) -> Result<String, rusqlite::Error> {
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", cache_size)?;
    if query_only {
        conn.pragma_update(None, "query_only", true)?;
    }
    Ok(journal_mode)
}

/// Handle to one SQLite database: lazy connection pair plus the write gate.
///
/// Construct it once and share it (`Arc<Database>`) with every consumer.
/// Reads go to the read pool and run concurrently; every mutating path
/// (`execute`, `execute_batch`, `transaction`, migrations, shutdown and WAL
/// recovery) holds the write gate for its whole duration. The gate is not
/// reentrant.
pub struct Database {
    settings: ConnectionSettings,
    slot: RwLock<Option<Arc<ConnectionPair>>>,
    pub(crate) write_gate: Mutex<()>,
}

impl Database {
    /// Create a handle for the configured database. No I/O happens until first use.
    pub fn new(config: &StorageConfig, environment: Environment) -> Self {
        Self::with_settings(ConnectionSettings::from_config(config, environment))
    }

    pub fn with_settings(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            slot: RwLock::new(None),
            write_gate: Mutex::new(()),
        }
    }

    /// Create a handle and connect immediately.
    pub async fn open(config: &StorageConfig, environment: Environment) -> Result<Self, QuarryError> {
        let db = Self::new(config, environment);
        db.ensure_connected().await?;
        Ok(db)
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// The SQLite connection string this handle opens.
    pub fn database_url(&self) -> &str {
        &self.settings.url
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Number of read handles, or `None` before the first connection.
    pub async fn read_concurrency(&self) -> Option<usize> {
        self.slot.read().await.as_ref().map(|pair| pair.readers.len())
    }

    /// Number of read handles not currently serving a query.
    pub async fn idle_readers(&self) -> Option<usize> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|pair| pair.readers.available())
    }

    /// Open the connection pair if it is not open yet. Idempotent.
    pub async fn ensure_connected(&self) -> Result<(), QuarryError> {
        self.pair().await.map(|_| ())
    }

    /// The current connection pair, opening it on first use.
    pub(crate) async fn pair(&self) -> Result<Arc<ConnectionPair>, QuarryError> {
        if let Some(pair) = self.slot.read().await.as_ref() {
            return Ok(Arc::clone(pair));
        }
        let mut slot = self.slot.write().await;
        self.open_into(&mut slot).await
    }

    async fn open_into(
        &self,
        slot: &mut RwLockWriteGuard<'_, Option<Arc<ConnectionPair>>>,
    ) -> Result<Arc<ConnectionPair>, QuarryError> {
        if let Some(pair) = slot.as_ref() {
            return Ok(Arc::clone(pair));
        }
        let pair = Arc::new(ConnectionPair::open(&self.settings).await?);
        info!(
            url = %self.settings.url,
            readers = self.settings.readers,
            "database connected"
        );
        **slot = Some(Arc::clone(&pair));
        Ok(pair)
    }

    /// Checkpoint the WAL and close every handle.
    ///
    /// All handles are attempted even when one fails; failures are reported
    /// together. A later call to any operation reconnects.
    pub async fn close(&self) -> Result<(), QuarryError> {
        let _gate = self.write_gate.lock().await;
        let mut slot = self.slot.write().await;
        let Some(pair) = slot.take() else {
            return Ok(());
        };

        let mut errors: Vec<BoxError> = Vec::new();
        if let Err(e) = pair
            .writer
            .call(|conn| conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", (), |_| Ok(())))
            .await
        {
            errors.push(Box::new(e));
        } else {
            debug!("WAL checkpoint complete");
        }
        errors.extend(pair.close().await);
        drop(slot);

        if errors.is_empty() {
            info!(url = %self.settings.url, "database closed");
            Ok(())
        } else {
            Err(QuarryError::Close { errors })
        }
    }

    /// Drop both handles, wait for the OS to release file locks, and reopen.
    ///
    /// Used when the WAL file no longer matches the database (for example
    /// after an external crash). Runs under the write gate; reads wait until
    /// the new pair is in place. Close failures do not prevent the reopen:
    /// they are returned after a successful reopen.
    pub async fn recover_from_wal_corruption(&self) -> Result<(), QuarryError> {
        let _gate = self.write_gate.lock().await;
        let mut slot = self.slot.write().await;

        let close_errors = match slot.take() {
            Some(pair) => pair.close().await,
            None => Vec::new(),
        };
        for e in &close_errors {
            error!(error = %e, "failed to close handle during WAL recovery");
        }

        tokio::time::sleep(self.settings.recovery_pause).await;
        self.open_into(&mut slot).await?;
        info!(url = %self.settings.url, "database reopened after WAL recovery");

        if close_errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::Close {
                errors: close_errors,
            })
        }
    }
}
