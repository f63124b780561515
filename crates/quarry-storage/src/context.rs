// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-call cancellation and deadlines for read operations.

use std::time::Duration;

use quarry_core::QuarryError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope passed to every read.
///
/// A read stops waiting, and interrupts its running statement, as soon as the
/// token is cancelled or the deadline passes. Writes never take a context:
/// once queued behind the write gate they run to completion.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    timeout: Option<(Duration, Instant)>,
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Give up after `timeout`, measured from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some((timeout, Instant::now() + timeout));
        self
    }

    /// Tie this context to an external token, e.g. a request's shutdown signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels this context.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .timeout
                .is_some_and(|(_, deadline)| Instant::now() >= deadline)
    }

    /// Resolves with the matching error once the context is cancelled or expired.
    pub(crate) async fn done(&self) -> QuarryError {
        match self.timeout {
            Some((duration, deadline)) => tokio::select! {
                _ = self.cancel.cancelled() => QuarryError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => QuarryError::Timeout { duration },
            },
            None => {
                self.cancel.cancelled().await;
                QuarryError::Cancelled
            }
        }
    }
}
