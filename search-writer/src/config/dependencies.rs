//! Dependency initialization and wiring for the search writer.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::AppError;
use search_writer_repository::{OpenSearchTransport, SearchApiClient, TransportConfig};

/// Default OpenSearch URL.
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// Client for the configured cluster, already health-checked.
    pub client: SearchApiClient,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `OPENSEARCH_TIMEOUT_SECS`: per-request timeout (default: client default)
    /// - `OPENSEARCH_MAX_PAGE_SIZE`: largest accepted page size (default: 10000)
    ///
    /// `url_override` takes precedence over `OPENSEARCH_URL`.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(AppError)` - If configuration is invalid or the cluster is unhealthy
    pub async fn new(url_override: Option<String>) -> Result<Self, AppError> {
        let config = transport_config(url_override)?;
        info!(opensearch_url = %config.url, "Initializing dependencies");

        let transport = OpenSearchTransport::new(&config)
            .map_err(|e| AppError::config(format!("Failed to create OpenSearch client: {}", e)))?;
        let client = SearchApiClient::with_config(Arc::new(transport), config);

        let healthy = client
            .health_check()
            .await
            .map_err(|e| AppError::config(format!("OpenSearch health check failed: {}", e)))?;
        if !healthy {
            return Err(AppError::config("OpenSearch cluster is unhealthy"));
        }
        info!("OpenSearch connection verified");

        Ok(Self { client })
    }
}

fn transport_config(url_override: Option<String>) -> Result<TransportConfig, AppError> {
    let url = url_override
        .or_else(|| env::var("OPENSEARCH_URL").ok())
        .unwrap_or_else(|| DEFAULT_OPENSEARCH_URL.to_string());
    let mut config = TransportConfig::new(url);

    if let Some(secs) = parse_env::<u64>("OPENSEARCH_TIMEOUT_SECS")? {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(size) = parse_env::<usize>("OPENSEARCH_MAX_PAGE_SIZE")? {
        config = config.with_max_page_size(size);
    }
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::config(format!("{} is not a valid number: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}
