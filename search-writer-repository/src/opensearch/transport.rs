//! OpenSearch transport implementation.
//!
//! This module provides the concrete implementation of `SearchTransport`
//! using the OpenSearch Rust client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opensearch::{
    http::{
        headers::{HeaderMap, HeaderValue, CONTENT_TYPE},
        request::JsonBody,
        transport::{SingleNodeConnectionPool, TransportBuilder},
        Method,
    },
    OpenSearch,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::TransportConfig;
use crate::errors::SearchError;
use crate::interfaces::{HttpMethod, RequestBody, SearchTransport};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// OpenSearch transport.
///
/// Classifies every response into the [`SearchError`] taxonomy and tracks
/// whether the endpoint answered the last request.
///
/// # Example
///
/// ```ignore
/// use search_writer_repository::{OpenSearchTransport, TransportConfig};
/// let transport = OpenSearchTransport::new(&TransportConfig::new("http://localhost:9200"))?;
/// let health = transport.send(HttpMethod::Get, "/_cluster/health", None).await?;
/// ```
pub struct OpenSearchTransport {
    client: OpenSearch,
    url: String,
    timeout: Option<Duration>,
    healthy: AtomicBool,
}

impl OpenSearchTransport {
    /// Create a new transport connected to the configured URL.
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchTransport)` - A new transport instance
    /// * `Err(SearchError)` - If the URL is invalid or the HTTP client cannot be built
    pub fn new(config: &TransportConfig) -> Result<Self, SearchError> {
        let parsed_url =
            Url::parse(&config.url).map_err(|e| SearchError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| SearchError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(url = %config.url, "Created OpenSearch transport");

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout,
            healthy: AtomicBool::new(true),
        })
    }

    /// Whether the endpoint answered the most recent request.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn mark_unhealthy(&self, reason: &str) {
        if self.healthy.swap(false, Ordering::Relaxed) {
            warn!(url = %self.url, reason = %reason, "Marking endpoint unhealthy");
        }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Put => Method::Put,
            HttpMethod::Post => Method::Post,
            HttpMethod::Delete => Method::Delete,
        }
    }

    /// Map a status code and body onto the error taxonomy.
    fn classify(status: u16, path: &str, body: String) -> Result<Value, SearchError> {
        match status {
            200..=299 => {
                if body.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    serde_json::from_str(&body).map_err(|e| {
                        SearchError::parse(format!("Unparsable response from {}: {}", path, e))
                    })
                }
            }
            404 => Err(SearchError::not_found(format!("{}: {}", path, body))),
            409 => Err(SearchError::version_conflict(body)),
            400 => Err(SearchError::bad_request(body)),
            429 | 502 | 503 => Err(SearchError::unavailable(format!(
                "status {} from {}: {}",
                status, path, body
            ))),
            _ => Err(SearchError::UnexpectedResponse { status, body }),
        }
    }
}

#[async_trait]
impl SearchTransport for OpenSearchTransport {
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Value, SearchError> {
        let os_method = Self::method(method);
        let mut headers = HeaderMap::new();

        let result = match body {
            None => {
                self.client
                    .send::<String, ()>(os_method, path, headers, None, None, self.timeout)
                    .await
            }
            Some(RequestBody::Json(value)) => {
                self.client
                    .send(
                        os_method,
                        path,
                        headers,
                        None::<&()>,
                        Some(JsonBody::new(value)),
                        self.timeout,
                    )
                    .await
            }
            Some(RequestBody::NdJson(lines)) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
                self.client
                    .send(os_method, path, headers, None::<&()>, Some(lines), self.timeout)
                    .await
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(method = %method, path = %path, error = %e, "Request failed");
                self.mark_unhealthy(&e.to_string());
                return Err(SearchError::connection(format!(
                    "could not execute {} {}: {}",
                    method, path, e
                )));
            }
        };

        let status = response.status_code().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| SearchError::connection(e.to_string()))?;

        debug!(method = %method, path = %path, status = status, "Request completed");

        let classified = Self::classify(status, path, text);
        match &classified {
            Err(SearchError::Unavailable(reason)) => self.mark_unhealthy(reason),
            _ => self.healthy.store(true, Ordering::Relaxed),
        }
        classified
    }
}
