// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Quarry database access layer.
//!
//! This crate provides the error taxonomy and the small set of shared types
//! (process environment, migration phase) used by the config, storage and
//! binary crates.

pub mod error;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{BoxError, QuarryError};
pub use types::{Environment, MigrationPhase};
