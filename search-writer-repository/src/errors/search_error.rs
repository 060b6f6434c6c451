//! Search error types.
//!
//! This module defines the error taxonomy shared by the transport, the typed
//! API client and everything built on top of them.

use thiserror::Error;

/// Errors that can occur during search engine operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    /// The document, index or alias does not exist. Never retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine rejected a write because the expected version did not match.
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// The request was malformed (schema, query); details carry the offending request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The engine is overloaded or unreachable (429, 502, 503).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The cluster is in a state that needs operator intervention.
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// Failed to establish or keep a connection to the search engine.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The engine answered with a status this client does not handle.
    #[error("Unexpected response {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    /// Failed to parse response from search engine.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize data for the search engine.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The caller passed arguments that can never succeed.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// An operation did not complete within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A bulk request failed as a whole.
    #[error("Bulk flush error: {0}")]
    BulkFlushError(String),

    /// The writer was already closed.
    #[error("Closed: {0}")]
    Closed(String),
}

impl SearchError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a version conflict error.
    pub fn version_conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }

    /// Create a bad request error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a corrupt state error.
    pub fn corrupt_state(msg: impl Into<String>) -> Self {
        Self::CorruptState(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a bulk flush error.
    pub fn bulk_flush(msg: impl Into<String>) -> Self {
        Self::BulkFlushError(msg.into())
    }

    /// Only version conflicts are worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict(_))
    }

    /// Whether the engine could not be reached at all.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::ConnectionError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
