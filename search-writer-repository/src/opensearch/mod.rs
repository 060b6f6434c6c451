//! OpenSearch implementation of the search transport.
//!
//! This module provides the concrete `SearchTransport` backed by OpenSearch,
//! plus the mapping resources and query bodies used against it.

mod index_config;
pub mod queries;
mod transport;

pub use index_config::{apply_replica_override, load_mapping};
pub use transport::OpenSearchTransport;
