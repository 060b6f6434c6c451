//! # Search Writer
//!
//! Configuration and wiring for the `search-writer` command-line tool.
//!
//! The tool runs the maintenance operations of the write path against a
//! live cluster: alias migrations, backups, restores, bulk deletes and counts.

pub mod config;

pub use config::{init_tracing, Dependencies, LogFormat};

use thiserror::Error;

/// Errors that can occur while configuring or running a command.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] search_writer_pipeline::PipelineError),

    /// Search error.
    #[error("Search error: {0}")]
    SearchError(#[from] search_writer_repository::SearchError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A bulk run finished but not every item was applied.
    #[error("Incomplete: {0}")]
    Incomplete(String),

    /// The command was interrupted before it finished.
    #[error("Interrupted")]
    Interrupted,
}

impl AppError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
