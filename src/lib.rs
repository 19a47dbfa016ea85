//! Card Shuttle: moves Steam trading cards between two accounts.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod steam;
pub mod engine;
