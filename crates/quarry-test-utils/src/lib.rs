// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Quarry integration tests.
//!
//! [`TestDatabase`] gives each test its own temp directory holding a database
//! file, a migrations directory populated with fixture migrations, and a
//! schema snapshot path.

pub mod harness;

pub use harness::{FIXTURE_MIGRATIONS, TestDatabase, TestDatabaseBuilder};
