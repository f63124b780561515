// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded pool of read handles.
//!
//! Each handle is its own `tokio-rusqlite` background thread, so the number of
//! handles is the read concurrency ceiling. A semaphore with one permit per
//! handle guarantees an idle handle exists whenever a permit is held.

use std::sync::{Arc, Mutex, PoisonError};

use quarry_core::{BoxError, QuarryError};
use rusqlite::InterruptHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One read connection plus the handle used to abort its running statement.
pub(crate) struct ReadHandle {
    pub(crate) conn: tokio_rusqlite::Connection,
    interrupt: InterruptHandle,
}

impl ReadHandle {
    pub(crate) fn new(conn: tokio_rusqlite::Connection, interrupt: InterruptHandle) -> Self {
        Self { conn, interrupt }
    }
}

/// Identifies one checkout of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LeaseId {
    index: usize,
    checkout: u64,
}

#[derive(Debug)]
struct Slots {
    idle: Vec<usize>,
    /// Checkouts so far, per handle.
    checkouts: Vec<u64>,
}

pub(crate) struct ReadPool {
    handles: Vec<ReadHandle>,
    slots: Mutex<Slots>,
    permits: Arc<Semaphore>,
}

impl ReadPool {
    pub(crate) fn new(handles: Vec<ReadHandle>) -> Arc<Self> {
        let slots = Slots {
            idle: (0..handles.len()).rev().collect(),
            checkouts: vec![0; handles.len()],
        };
        let permits = Arc::new(Semaphore::new(handles.len()));
        Arc::new(Self {
            handles,
            slots: Mutex::new(slots),
            permits,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Number of handles not currently leased.
    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for an idle handle.
    pub(crate) async fn checkout(self: &Arc<Self>) -> Result<ReadLease, QuarryError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| QuarryError::Internal("read pool closed".into()))?;
        let id = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let index = slots.idle.pop().ok_or_else(|| {
                QuarryError::Internal("read permit held without an idle handle".into())
            })?;
            slots.checkouts[index] += 1;
            LeaseId {
                index,
                checkout: slots.checkouts[index],
            }
        };
        Ok(ReadLease {
            pool: Arc::clone(self),
            id,
            _permit: permit,
        })
    }

    /// Abort the statement running under lease `id`.
    ///
    /// Does nothing once that lease is back in the pool, so a later reader
    /// of the same handle is never interrupted.
    pub(crate) fn interrupt(&self, id: LeaseId) {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.checkouts[id.index] == id.checkout && !slots.idle.contains(&id.index) {
            self.handles[id.index].interrupt.interrupt();
        }
    }

    /// Close every handle, attempting all of them.
    pub(crate) async fn close(&self) -> Vec<BoxError> {
        let mut errors: Vec<BoxError> = Vec::new();
        for handle in &self.handles {
            if let Err(e) = handle.conn.clone().close().await {
                errors.push(Box::new(e));
            }
        }
        errors
    }
}

/// A leased read handle; returned to the pool on drop.
///
/// The lease is owned, so it can travel into the closure queued on the
/// handle's thread. The handle then stays leased until that closure has
/// finished, even if the caller stopped waiting for it.
pub(crate) struct ReadLease {
    pool: Arc<ReadPool>,
    id: LeaseId,
    _permit: OwnedSemaphorePermit,
}

impl ReadLease {
    pub(crate) fn id(&self) -> LeaseId {
        self.id
    }

    pub(crate) fn conn(&self) -> &tokio_rusqlite::Connection {
        &self.pool.handles[self.id.index].conn
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.pool
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .idle
            .push(self.id.index);
    }
}
