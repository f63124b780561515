// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Quarry database access layer.

use thiserror::Error;

use crate::types::{Environment, MigrationPhase};

/// Boxed error source carried by the wrapping variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type returned by every Quarry operation.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Configuration errors (invalid TOML, bad environment name, failed validation).
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection pair could not be established. Fatal at startup.
    #[error("failed to connect to database at {path}: {source}")]
    Connect { path: String, source: BoxError },

    /// Statement execution, query or row-mapping failure.
    #[error("storage error: {source}")]
    Storage { source: BoxError },

    /// A read was abandoned because its cancellation token fired.
    #[error("query cancelled")]
    Cancelled,

    /// A read did not finish before its deadline.
    #[error("query deadline exceeded after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The unit of work succeeded but the transaction failed to commit.
    #[error("transaction commit failed: {source}")]
    Commit { source: BoxError },

    /// A migrate, rollback or drop failed. `source` holds the root cause.
    #[error("{}: {source}", .phase.failure_message())]
    Migration {
        phase: MigrationPhase,
        source: BoxError,
    },

    /// A destructive operation was attempted in production.
    #[error("cannot run in {environment}")]
    ForbiddenInProduction { environment: Environment },

    /// One or more handles failed to close. Every handle was still attempted.
    #[error("failed to close {} database handle(s): {}", .errors.len(), join_errors(.errors))]
    Close { errors: Vec<BoxError> },

    /// Writing the schema snapshot failed.
    #[error("schema snapshot failed: {source}")]
    SchemaSnapshot { source: BoxError },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuarryError {
    /// Wrap any error as a storage failure.
    pub fn storage(source: impl Into<BoxError>) -> Self {
        QuarryError::Storage {
            source: source.into(),
        }
    }

    /// Wrap a root cause with a migration phase.
    pub fn migration(phase: MigrationPhase, source: impl Into<BoxError>) -> Self {
        QuarryError::Migration {
            phase,
            source: source.into(),
        }
    }

    /// The migration phase this error belongs to, if any.
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            QuarryError::Migration { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// True when this error, or the cause it wraps, is the production policy refusal.
    pub fn is_forbidden_in_production(&self) -> bool {
        match self {
            QuarryError::ForbiddenInProduction { .. } => true,
            QuarryError::Migration { source, .. } => source
                .downcast_ref::<QuarryError>()
                .is_some_and(QuarryError::is_forbidden_in_production),
            _ => false,
        }
    }
}

fn join_errors(errors: &[BoxError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
