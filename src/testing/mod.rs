//! Helpers for unit and integration tests
//!
//! Every helper panics on setup failure; a broken fixture should fail the
//! test immediately.

pub mod setup;
pub mod upstream;
