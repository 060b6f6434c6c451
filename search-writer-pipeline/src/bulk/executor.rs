//! Batch dispatch.
//!
//! With zero or one worker, batches are sent on the caller's task and a
//! transport failure becomes a single `on_fail` callback. With more workers,
//! batches go to a bounded pool: `workers` sends run at once and up to twice
//! as many wait. When the pool is full, the caller sends the batch itself.
//! Pool failures are collected and reported by [`FlushExecutor::close`].

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, instrument, warn};

use search_writer_repository::{SearchApiClient, SearchError};
use search_writer_shared::Outcome;

use crate::bulk::codec::Batch;
use crate::classifier::ResponseClassifier;
use crate::status::StatusHandler;

/// Code reported when the engine answers with fewer items than were sent.
pub const MISSING_ITEM: &str = "missing_item";

/// Sends one batch and routes every item outcome to the status handler.
pub(crate) struct BatchSender {
    client: SearchApiClient,
    handler: Arc<dyn StatusHandler>,
    classifier: ResponseClassifier,
    refresh: bool,
}

impl BatchSender {
    pub(crate) fn new(
        client: SearchApiClient,
        handler: Arc<dyn StatusHandler>,
        classifier: ResponseClassifier,
        refresh: bool,
    ) -> Self {
        Self {
            client,
            handler,
            classifier,
            refresh,
        }
    }

    #[instrument(skip(self, batch), fields(ops = batch.len()))]
    async fn send(&self, batch: Batch) -> Result<(), SearchError> {
        let Batch { body, ops } = batch;
        let response = self.client.bulk(body, self.refresh).await?;
        let items = response
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::parse("bulk response has no 'items'"))?;

        if items.len() != ops.len() {
            warn!(sent = ops.len(), received = items.len(), "Bulk response item count mismatch");
        }

        for (i, op) in ops.into_iter().enumerate() {
            let Some(item) = items.get(i) else {
                self.handler
                    .on_error(MISSING_ITEM, &json!({ "_id": op.id, "position": i }));
                continue;
            };

            match self.classifier.classify(op.kind.action(), item) {
                Outcome::Ok => self.handler.on_ok(item),
                Outcome::Conflict { id, provided_version } => match op.transform {
                    Some(transform) if op.version == Some(provided_version) => {
                        self.handler
                            .on_conflict(&id, op.routing.as_deref(), transform)
                            .await
                    }
                    _ => self.handler.on_error("version_conflict", item),
                },
                Outcome::Error { code, details } => self.handler.on_error(&code, &details),
            }
        }

        self.handler.on_flush();
        Ok(())
    }
}

struct Pool {
    slots: Arc<Semaphore>,
    running: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<Result<(), SearchError>>>>,
    failures: Mutex<Vec<String>>,
}

/// Dispatches batches inline or through a bounded worker pool.
pub struct FlushExecutor {
    sender: Arc<BatchSender>,
    pool: Option<Pool>,
}

impl FlushExecutor {
    pub(crate) fn new(sender: BatchSender, workers: usize) -> Self {
        let pool = (workers > 1).then(|| Pool {
            slots: Arc::new(Semaphore::new(workers * 3)),
            running: Arc::new(Semaphore::new(workers)),
            tasks: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        });
        Self {
            sender: Arc::new(sender),
            pool,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Send a batch.
    ///
    /// Inline sends report transport failures through `on_fail` and return
    /// `Ok`. A pooled batch that had to run on the caller returns its error.
    pub async fn submit(&self, batch: Batch) -> Result<(), SearchError> {
        let Some(pool) = &self.pool else {
            let count = batch.len();
            if let Err(e) = self.sender.send(batch).await {
                let description = format!("bulk request of {} operations failed: {}", count, e);
                error!(error = %e, count = count, "Bulk request failed");
                self.sender.handler.on_fail(&description);
            }
            return Ok(());
        };

        self.reap(pool).await;

        match pool.slots.clone().try_acquire_owned() {
            Ok(slot) => {
                let sender = self.sender.clone();
                let running = pool.running.clone();
                let handle = tokio::spawn(async move {
                    let _slot = slot;
                    let _permit = running
                        .acquire_owned()
                        .await
                        .map_err(|_| SearchError::Closed("flush pool shut down".to_string()))?;
                    sender.send(batch).await
                });
                pool.tasks.lock().await.push(handle);
                Ok(())
            }
            Err(_) => {
                debug!(ops = batch.len(), "Flush queue full, sending on caller");
                let count = batch.len();
                self.sender.send(batch).await.map_err(|e| {
                    self.sender.handler.on_fail(&format!(
                        "bulk request of {} operations failed: {}",
                        count, e
                    ));
                    e
                })
            }
        }
    }

    /// Wait for every pooled send and report whether any failed.
    pub async fn close(&self) -> Result<(), SearchError> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let handles = std::mem::take(&mut *pool.tasks.lock().await);
        for handle in handles {
            let result = handle.await;
            self.record(pool, result).await;
        }

        let failures = std::mem::take(&mut *pool.failures.lock().await);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SearchError::bulk_flush(format!(
                "{} bulk requests failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Collect finished sends so their failures are reported promptly.
    async fn reap(&self, pool: &Pool) {
        let finished = {
            let mut tasks = pool.tasks.lock().await;
            let (finished, pending): (Vec<_>, Vec<_>) =
                tasks.drain(..).partition(|handle| handle.is_finished());
            *tasks = pending;
            finished
        };
        for handle in finished {
            let result = handle.await;
            self.record(pool, result).await;
        }
    }

    async fn record(&self, pool: &Pool, result: Result<Result<(), SearchError>, JoinError>) {
        let description = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("bulk request failed: {}", e),
            Err(e) => format!("flush worker did not complete: {}", e),
        };
        error!(description = %description, "Pooled flush failed");
        self.sender.handler.on_fail(&description);
        pool.failures.lock().await.push(description);
    }
}
