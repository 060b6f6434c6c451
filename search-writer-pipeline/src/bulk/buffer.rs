//! Bulk write buffer.
//!
//! Operations are appended under a lock; every `batch_size`-th enqueue drains
//! the buffer into a batch and hands it to the [`FlushExecutor`]. The lock is
//! only held to swap the pending list, never across a network call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use search_writer_repository::{SearchApiClient, SearchError};
use search_writer_shared::{
    now_timestamp, Document, Operation, OperationKind, StatusSummary, Transform,
    DEFAULT_MODIFIED_FIELD,
};

use crate::bulk::codec;
use crate::bulk::executor::{BatchSender, FlushExecutor};
use crate::classifier::ResponseClassifier;
use crate::status::StatusHandler;

/// Configuration for [`BulkWriteBuffer`].
#[derive(Debug, Clone)]
pub struct BulkWriterConfig {
    /// Operations per batch. Must be greater than zero.
    pub batch_size: usize,
    /// Flush workers; 0 or 1 sends every batch on the caller.
    pub workers: usize,
    /// How long `close` waits for outstanding sends.
    pub close_timeout: Duration,
    /// Ask the engine to refresh after every bulk request.
    pub refresh: bool,
    /// Field stamped with the current time on updates; `None` disables stamping.
    pub updated_at_field: Option<String>,
}

impl Default for BulkWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: 0,
            close_timeout: Duration::from_secs(20 * 60),
            refresh: false,
            updated_at_field: Some(DEFAULT_MODIFIED_FIELD.to_string()),
        }
    }
}

impl BulkWriterConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_updated_at_field(mut self, field: Option<String>) -> Self {
        self.updated_at_field = field;
        self
    }
}

#[derive(Default)]
struct Pending {
    ops: Vec<Operation>,
    count: u64,
}

/// Thread-safe accumulator that turns single operations into bulk requests.
///
/// # Example
///
/// ```ignore
/// let writer = BulkWriteBuffer::new(client, "people", handler, BulkWriterConfig::default())?;
/// writer.enqueue(Operation::index(Some("1".into()), doc)).await?;
/// let summary = writer.close().await?;
/// ```
pub struct BulkWriteBuffer {
    index: String,
    config: BulkWriterConfig,
    handler: Arc<dyn StatusHandler>,
    pending: Mutex<Pending>,
    executor: FlushExecutor,
    closed: AtomicBool,
}

impl BulkWriteBuffer {
    /// Create a writer targeting `index` (an index or alias).
    ///
    /// # Returns
    ///
    /// * `Err(SearchError::ValidationError)` - If `batch_size` is zero
    pub fn new(
        client: SearchApiClient,
        index: impl Into<String>,
        handler: Arc<dyn StatusHandler>,
        config: BulkWriterConfig,
    ) -> Result<Self, SearchError> {
        if config.batch_size == 0 {
            return Err(SearchError::validation("batch size must be greater than zero"));
        }
        let classifier =
            ResponseClassifier::new().map_err(|e| SearchError::validation(e.to_string()))?;
        let sender = BatchSender::new(client, handler.clone(), classifier, config.refresh);
        let executor = FlushExecutor::new(sender, config.workers);

        let index = index.into();
        debug!(
            index = %index,
            batch_size = config.batch_size,
            workers = config.workers,
            "Created bulk writer"
        );
        handler.on_start();

        Ok(Self {
            index,
            config,
            handler,
            pending: Mutex::new(Pending::default()),
            executor,
            closed: AtomicBool::new(false),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn handler(&self) -> &Arc<dyn StatusHandler> {
        &self.handler
    }

    /// Append an operation; every `batch_size`-th call flushes.
    pub async fn enqueue(&self, op: Operation) -> Result<(), SearchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SearchError::Closed(format!("bulk writer for {}", self.index)));
        }
        validate(&op)?;

        let should_flush = {
            let mut pending = self.pending.lock().await;
            pending.ops.push(op);
            pending.count += 1;
            pending.count % self.config.batch_size as u64 == 0
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Index a document under the given id (or a generated one).
    pub async fn index_document(&self, id: Option<String>, doc: Document) -> Result<(), SearchError> {
        self.enqueue(Operation::index(id, doc)).await
    }

    /// Delete a document by id.
    pub async fn delete(&self, id: impl Into<String>) -> Result<(), SearchError> {
        self.enqueue(Operation::delete(id)).await
    }

    /// Replace `old_doc` with `transform(old_doc)`, guarded by `version`.
    ///
    /// Returns `false` without enqueueing anything if the transform leaves the
    /// document unchanged.
    pub async fn update(
        &self,
        id: impl Into<String>,
        version: u64,
        routing: Option<String>,
        old_doc: &Document,
        transform: Transform,
    ) -> Result<bool, SearchError> {
        let mut new_doc = transform(old_doc.clone());
        if &new_doc == old_doc {
            return Ok(false);
        }
        if let Some(field) = &self.config.updated_at_field {
            new_doc.insert(field.clone(), now_timestamp().into());
        }

        let mut op = Operation::update(id, Some(version), new_doc, transform);
        op.routing = routing;
        self.enqueue(op).await?;
        Ok(true)
    }

    /// Send everything buffered so far.
    #[instrument(skip(self), fields(index = %self.index))]
    pub async fn flush(&self) -> Result<(), SearchError> {
        let ops = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut pending.ops)
        };
        if ops.is_empty() {
            return Ok(());
        }

        debug!(count = ops.len(), "Flushing bulk batch");
        let batch = codec::render_batch(&self.index, ops)?;
        self.executor.submit(batch).await
    }

    /// Flush, then wait for outstanding sends up to `close_timeout`.
    ///
    /// Further enqueues fail with [`SearchError::Closed`]. A timeout is
    /// reported through `on_fail` and returned as [`SearchError::Timeout`].
    #[instrument(skip(self), fields(index = %self.index))]
    pub async fn close(&self) -> Result<StatusSummary, SearchError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(self.handler.status());
        }

        let flushed = self.flush().await;
        let drained = match tokio::time::timeout(self.config.close_timeout, self.executor.close()).await {
            Ok(result) => result,
            Err(_) => {
                let description = format!(
                    "bulk writer for {} did not finish within {:?}; unconfirmed writes may be lost",
                    self.index, self.config.close_timeout
                );
                error!(description = %description, "Close timed out");
                self.handler.on_fail(&description);
                Err(SearchError::Timeout(description))
            }
        };
        self.handler.on_done();

        flushed?;
        drained?;
        let status = self.handler.status();
        info!(ok = status.ok, errors = status.errors, "Closed bulk writer");
        Ok(status)
    }
}

impl Drop for BulkWriteBuffer {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Ok(pending) = self.pending.try_lock() {
            if !pending.ops.is_empty() {
                warn!(
                    index = %self.index,
                    count = pending.ops.len(),
                    "Bulk writer dropped without close; pending operations discarded"
                );
            }
        }
    }
}

fn validate(op: &Operation) -> Result<(), SearchError> {
    match op.kind {
        OperationKind::Index if op.payload.is_none() => {
            Err(SearchError::validation("index operation without a document"))
        }
        OperationKind::Update if op.payload.is_none() || op.id.is_none() => {
            Err(SearchError::validation("update operation needs an id and a document"))
        }
        OperationKind::Delete if op.id.is_none() => {
            Err(SearchError::validation("delete operation without an id"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::LoggingStatusHandler;
    use async_trait::async_trait;
    use search_writer_repository::{HttpMethod, RequestBody, SearchTransport};
    use search_writer_shared::transform;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    /// Accepts every bulk request and answers each item with `status: 201`.
    #[derive(Default)]
    struct AcceptingTransport {
        requests: AtomicUsize,
        items: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SearchTransport for AcceptingTransport {
        async fn send(
            &self,
            _method: HttpMethod,
            _path: &str,
            body: Option<RequestBody>,
        ) -> Result<Value, SearchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SearchError::unavailable("503"));
            }
            let Some(RequestBody::NdJson(body)) = body else {
                return Err(SearchError::bad_request("expected ndjson"));
            };
            let entries = codec::decode(&body)?;
            self.items.fetch_add(entries.len(), Ordering::SeqCst);
            let items: Vec<Value> = entries
                .iter()
                .map(|e| {
                    let mut item = serde_json::Map::new();
                    item.insert(
                        e.action.clone(),
                        json!({"_id": e.metadata.get("_id"), "status": 201}),
                    );
                    Value::Object(item)
                })
                .collect();
            Ok(json!({ "errors": false, "items": items }))
        }
    }

    /// Never answers.
    struct HangingTransport;

    #[async_trait]
    impl SearchTransport for HangingTransport {
        async fn send(
            &self,
            _method: HttpMethod,
            _path: &str,
            _body: Option<RequestBody>,
        ) -> Result<Value, SearchError> {
            std::future::pending().await
        }
    }

    fn writer(
        transport: Arc<AcceptingTransport>,
        config: BulkWriterConfig,
    ) -> (BulkWriteBuffer, Arc<LoggingStatusHandler>) {
        let handler = Arc::new(LoggingStatusHandler::new("test"));
        let writer =
            BulkWriteBuffer::new(SearchApiClient::new(transport), "people", handler.clone(), config)
                .unwrap();
        (writer, handler)
    }

    fn doc(n: usize) -> Document {
        json!({ "n": n }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = BulkWriteBuffer::new(
            SearchApiClient::new(Arc::new(AcceptingTransport::default())),
            "people",
            Arc::new(LoggingStatusHandler::new("test")),
            BulkWriterConfig::default().with_batch_size(0),
        );
        assert!(matches!(result, Err(SearchError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_flushes_every_batch_size() {
        let transport = Arc::new(AcceptingTransport::default());
        let (writer, handler) = writer(transport.clone(), BulkWriterConfig::default().with_batch_size(5));

        for i in 0..12 {
            writer.index_document(Some(i.to_string()), doc(i)).await.unwrap();
        }
        assert_eq!(transport.requests.load(Ordering::SeqCst), 2);
        assert_eq!(transport.items.load(Ordering::SeqCst), 10);

        let status = writer.close().await.unwrap();
        assert_eq!(transport.requests.load(Ordering::SeqCst), 3);
        assert_eq!(status.ok, 12);
        assert_eq!(handler.status(), status);
    }

    #[tokio::test]
    async fn test_unchanged_update_is_not_enqueued() {
        let transport = Arc::new(AcceptingTransport::default());
        let (writer, _) = writer(transport.clone(), BulkWriterConfig::default().with_batch_size(1));

        let changed = writer
            .update("1", 3, None, &doc(1), transform(|d| d))
            .await
            .unwrap();

        assert!(!changed);
        writer.close().await.unwrap();
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_is_enqueued_with_timestamp() {
        let transport = Arc::new(AcceptingTransport::default());
        let (writer, handler) = writer(transport.clone(), BulkWriterConfig::default().with_batch_size(1));

        let changed = writer
            .update(
                "1",
                3,
                Some("p".into()),
                &doc(1),
                transform(|mut d| {
                    d.insert("n".into(), json!(2));
                    d
                }),
            )
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(handler.status().ok, 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let transport = Arc::new(AcceptingTransport::default());
        let (writer, _) = writer(transport, BulkWriterConfig::default());

        writer.close().await.unwrap();
        let result = writer.delete("1").await;

        assert!(matches!(result, Err(SearchError::Closed(_))));
    }

    #[tokio::test]
    async fn test_inline_transport_failure_reported_once() {
        let transport = Arc::new(AcceptingTransport {
            fail: true,
            ..Default::default()
        });
        let (writer, handler) = writer(transport, BulkWriterConfig::default().with_batch_size(2));

        writer.delete("1").await.unwrap();
        writer.delete("2").await.unwrap();

        let status = writer.close().await.unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(handler.status().ok, 0);
    }

    #[tokio::test]
    async fn test_pooled_failures_surface_on_close() {
        let transport = Arc::new(AcceptingTransport {
            fail: true,
            ..Default::default()
        });
        let (writer, handler) = writer(
            transport.clone(),
            BulkWriterConfig::default().with_batch_size(1).with_workers(2),
        );

        for i in 0..3 {
            writer.delete(i.to_string()).await.unwrap();
        }
        let result = writer.close().await;

        assert!(matches!(result, Err(SearchError::BulkFlushError(_))));
        assert_eq!(transport.requests.load(Ordering::SeqCst), 3);
        assert_eq!(handler.status().failures, 3);
    }

    #[tokio::test]
    async fn test_pool_runs_on_caller_when_full() {
        let transport = Arc::new(AcceptingTransport::default());
        let (writer, handler) = writer(
            transport.clone(),
            BulkWriterConfig::default().with_batch_size(1).with_workers(2),
        );

        // Spawned sends do not run until this task yields, so the first six
        // batches fill the pool and the rest are sent on this task.
        for i in 0..10 {
            writer.delete(i.to_string()).await.unwrap();
        }
        assert_eq!(transport.requests.load(Ordering::SeqCst), 4);

        let status = writer.close().await.unwrap();
        assert_eq!(transport.requests.load(Ordering::SeqCst), 10);
        assert_eq!(status.ok, 10);
        assert_eq!(handler.status().failures, 0);
    }

    #[tokio::test]
    async fn test_invalid_operation_rejected() {
        let transport = Arc::new(AcceptingTransport::default());
        let (writer, _) = writer(transport, BulkWriterConfig::default());

        let mut op = Operation::delete("1");
        op.id = None;

        assert!(matches!(
            writer.enqueue(op).await,
            Err(SearchError::ValidationError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_timeout_reports_failure() {
        let handler = Arc::new(LoggingStatusHandler::new("test"));
        let writer = BulkWriteBuffer::new(
            SearchApiClient::new(Arc::new(HangingTransport)),
            "people",
            handler.clone(),
            BulkWriterConfig::default()
                .with_batch_size(1)
                .with_workers(2)
                .with_close_timeout(Duration::from_secs(1)),
        )
        .unwrap();

        writer.delete("1").await.unwrap();
        let result = writer.close().await;

        assert!(matches!(result, Err(SearchError::Timeout(_))));
        assert_eq!(handler.status().failures, 1);
        assert_eq!(handler.status().ok, 0);
    }
}
