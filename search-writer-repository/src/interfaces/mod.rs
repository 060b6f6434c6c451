//! Interface definitions for the search engine transport.
//!
//! This module defines the abstract `SearchTransport` trait that allows
//! for dependency injection and swappable search backend implementations.

mod search_transport;

pub use search_transport::{HttpMethod, RequestBody, SearchTransport};
