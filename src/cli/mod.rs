//! CLI support for sieve-lang
//!
//! Provides programmatic access to the `sieve check` command for embedding
//! in other tools.

mod check;

pub use check::{CheckOptions, CheckOutput, CheckResult, execute_check};

use std::io;

use thiserror::Error;

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    /// Parse, compile or evaluation failure
    #[error("{0}")]
    Sieve(#[from] crate::Error),
    /// JSON parsing error
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// No input provided
    #[error("No input provided. Use --input or pipe JSON to stdin.")]
    NoInput,
    /// A flag value that could not be used
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}
