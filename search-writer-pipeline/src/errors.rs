//! Pipeline error types.

use search_writer_repository::SearchError;
use search_writer_shared::StatusSummary;
use thiserror::Error;

/// Errors raised by the write-path engines.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An engine call failed.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Reading or writing a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reindex pass reported item-level problems; the old index was kept.
    #[error("reindex of {old_index} into {target_index} incomplete: {summary:?}")]
    ReindexIncomplete {
        old_index: String,
        target_index: String,
        summary: StatusSummary,
    },

    /// A blocking file task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Invalid input that can never succeed.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PipelineError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// The underlying engine error, if there is one.
    pub fn search_error(&self) -> Option<&SearchError> {
        match self {
            Self::Search(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Search(e) if e.is_not_found())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Search(SearchError::from(err))
    }
}
