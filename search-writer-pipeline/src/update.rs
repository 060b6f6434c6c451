//! Optimistic-concurrency updates.
//!
//! Read the document, apply a transform to a copy, write it back guarded by
//! the version that was read. A version conflict means another writer got
//! there first; the loop re-reads and tries again, up to a bound.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use search_writer_repository::{DocumentRef, SearchApiClient, SearchError};
use search_writer_shared::{now_timestamp, Transform, VersionedDocument, DEFAULT_MODIFIED_FIELD};

/// Configuration for [`OptimisticUpdater`].
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Retries after the first attempt; `max_retries + 1` attempts in total.
    pub max_retries: u32,
    /// Multiplied by the attempt number to get the base sleep before a retry.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random delay added to every retry sleep.
    pub jitter_ceiling: Duration,
    /// Stamp `updated_at_field` with the current time on every write.
    pub modify_updated_at: bool,
    pub updated_at_field: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            jitter_ceiling: Duration::from_millis(50),
            modify_updated_at: true,
            updated_at_field: DEFAULT_MODIFIED_FIELD.to_string(),
        }
    }
}

impl UpdateConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, jitter_ceiling: Duration) -> Self {
        self.base_delay = base_delay;
        self.jitter_ceiling = jitter_ceiling;
        self
    }

    pub fn with_modify_updated_at(mut self, modify_updated_at: bool) -> Self {
        self.modify_updated_at = modify_updated_at;
        self
    }
}

/// Get-modify-compare-write loop with jittered, bounded retry.
pub struct OptimisticUpdater {
    client: SearchApiClient,
    config: UpdateConfig,
}

impl OptimisticUpdater {
    pub fn new(client: SearchApiClient) -> Self {
        Self::with_config(client, UpdateConfig::default())
    }

    pub fn with_config(client: SearchApiClient, config: UpdateConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Apply `transform` to the current version of a document.
    ///
    /// # Returns
    ///
    /// * `Ok(doc)` - The stored document; unchanged (same version) if the
    ///   transform was a no-op
    /// * `Err(SearchError::NotFound)` - The document does not exist
    /// * `Err(SearchError::VersionConflict)` - Every attempt lost the race
    pub async fn update(
        &self,
        doc: &DocumentRef,
        transform: &Transform,
    ) -> Result<VersionedDocument, SearchError> {
        self.update_with(doc, transform, self.config.modify_updated_at)
            .await
    }

    /// Like [`OptimisticUpdater::update`], choosing per call whether the
    /// modification timestamp is stamped.
    #[instrument(skip(self, transform), fields(index = %doc.index, id = %doc.id))]
    pub async fn update_with(
        &self,
        doc: &DocumentRef,
        transform: &Transform,
        modify_updated_at: bool,
    ) -> Result<VersionedDocument, SearchError> {
        let mut attempt: u32 = 0;
        loop {
            let current = self
                .client
                .get_document(doc)
                .await?
                .ok_or_else(|| SearchError::not_found(format!("{}/{}", doc.index, doc.id)))?;

            let mut next = transform(current.source.clone());
            if next == current.source {
                debug!(version = current.version, "Transform left document unchanged");
                return Ok(current);
            }
            if modify_updated_at {
                next.insert(
                    self.config.updated_at_field.clone(),
                    now_timestamp().into(),
                );
            }

            match self.client.put_document(doc, Some(current.version), &next).await {
                Ok(version) => {
                    return Ok(VersionedDocument {
                        id: current.id,
                        version,
                        routing: current.routing,
                        source: next,
                    })
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Version conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.config.jitter_ceiling.as_millis() as u64;
        let jitter = if ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..ceiling)
        };
        self.config.base_delay * attempt + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use search_writer_repository::{HttpMethod, RequestBody, SearchTransport};
    use search_writer_shared::transform;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves a fixed document and rejects every write with a conflict.
    #[derive(Default)]
    struct ConflictingTransport {
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl SearchTransport for ConflictingTransport {
        async fn send(
            &self,
            method: HttpMethod,
            _path: &str,
            _body: Option<RequestBody>,
        ) -> Result<Value, SearchError> {
            match method {
                HttpMethod::Get => {
                    let n = self.gets.fetch_add(1, Ordering::SeqCst) as u64;
                    Ok(json!({"_id": "1", "_version": n + 1, "found": true, "_source": {"n": 0}}))
                }
                _ => {
                    self.puts.fetch_add(1, Ordering::SeqCst);
                    Err(SearchError::version_conflict("current [2], provided [1]"))
                }
            }
        }
    }

    fn updater(transport: Arc<ConflictingTransport>, max_retries: u32) -> OptimisticUpdater {
        OptimisticUpdater::with_config(
            SearchApiClient::new(transport),
            UpdateConfig::default().with_max_retries(max_retries),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_retry_bound() {
        let transport = Arc::new(ConflictingTransport::default());
        let updater = updater(transport.clone(), 4);
        let increment = transform(|mut d| {
            d.insert("n".into(), json!(1));
            d
        });

        let result = updater.update(&DocumentRef::new("people", "1"), &increment).await;

        assert!(matches!(result, Err(SearchError::VersionConflict(_))));
        assert_eq!(transport.puts.load(Ordering::SeqCst), 5);
        assert_eq!(transport.gets.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_unchanged_document_is_not_written() {
        let transport = Arc::new(ConflictingTransport::default());
        let updater = updater(transport.clone(), 3);

        let result = updater
            .update(&DocumentRef::new("people", "1"), &transform(|d| d))
            .await
            .unwrap();

        assert_eq!(result.version, 1);
        assert_eq!(transport.puts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_grows_with_attempt() {
        let updater = OptimisticUpdater::with_config(
            SearchApiClient::new(Arc::new(ConflictingTransport::default())),
            UpdateConfig::default().with_delays(Duration::from_millis(50), Duration::ZERO),
        );
        assert_eq!(updater.backoff(1), Duration::from_millis(50));
        assert_eq!(updater.backoff(3), Duration::from_millis(150));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let updater = OptimisticUpdater::with_config(
            SearchApiClient::new(Arc::new(ConflictingTransport::default())),
            UpdateConfig::default(),
        );
        for _ in 0..50 {
            let delay = updater.backoff(2);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }
}
