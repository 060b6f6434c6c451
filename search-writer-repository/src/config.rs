//! Configuration types for the transport and API client.

use std::time::Duration;

/// Default OpenSearch URL.
pub const DEFAULT_URL: &str = "http://localhost:9200";

/// Configuration for the search engine connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The engine endpoint (e.g. "http://localhost:9200").
    pub url: String,
    /// Per-request timeout. `None` leaves the client default in place.
    pub timeout: Option<Duration>,
    /// Upper bound for page sizes in paged and scrolled searches.
    pub max_page_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            timeout: None,
            max_page_size: 10_000,
        }
    }
}

impl TransportConfig {
    /// Create a config pointing at the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the maximum page size accepted by searches.
    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }
}
