//! Shared test utilities for mediashelf integration tests.
//!
//! This module provides:
//! - `TestHarness`, a pipeline over an in-memory database and filesystem
//! - Builders for locations, policies and catalog answers

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{TestHarness, DROP_ID, LIBRARY_ID};
