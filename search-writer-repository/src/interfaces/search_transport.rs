//! Search transport trait definition.
//!
//! This module defines the boundary between the write path and the wire: a
//! single `send` call whose failures are already classified into
//! [`SearchError`] variants.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SearchError;

/// HTTP methods used against the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    /// Whether a request with this method can change engine state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// A JSON document.
    Json(Value),
    /// Newline-delimited JSON, as used by the bulk API.
    NdJson(String),
}

/// Abstract interface for talking to the search engine.
///
/// Implementations map HTTP statuses onto the error taxonomy:
///
/// * `404` → [`SearchError::NotFound`]
/// * `409` → [`SearchError::VersionConflict`]
/// * `400` → [`SearchError::BadRequest`]
/// * `429`, `502`, `503` → [`SearchError::Unavailable`]
/// * I/O failures → [`SearchError::ConnectionError`]
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow use across async tasks.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Send a request and return the parsed JSON response body.
    ///
    /// `path` is relative to the engine endpoint and may carry a query string.
    /// Responses without a body are returned as `Value::Null`.
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Value, SearchError>;
}
