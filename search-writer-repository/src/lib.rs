//! # Search Writer Repository
//!
//! This crate provides the boundary to the search engine: the error taxonomy,
//! the `SearchTransport` trait, a concrete transport for OpenSearch and the
//! typed `SearchApiClient` the write path is built on.

pub mod client;
pub mod config;
pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;

pub use client::SearchApiClient;
pub use config::TransportConfig;
pub use errors::SearchError;
pub use interfaces::{HttpMethod, RequestBody, SearchTransport};
pub use opensearch::{queries, OpenSearchTransport};
pub use types::{AliasAction, DocumentRef, PagedResults, ScrollPage};
