//! Status callbacks driven by the bulk writer.
//!
//! A [`StatusHandler`] sees every per-item outcome and every per-flush event
//! of a [`crate::BulkWriteBuffer`]. All callbacks except [`StatusHandler::status`]
//! default to no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use search_writer_repository::DocumentRef;
use search_writer_shared::{StatusSummary, Transform};

use crate::update::OptimisticUpdater;

/// Callback surface for bulk write events.
///
/// # Thread Safety
///
/// Callbacks may be invoked concurrently from several flush workers.
#[async_trait]
pub trait StatusHandler: Send + Sync {
    /// The writer was created.
    fn on_start(&self) {}

    /// One item was applied.
    fn on_ok(&self, _item: &Value) {}

    /// One update was rejected because the document changed since it was read.
    ///
    /// `transform` is the function that produced the rejected payload, so it
    /// can be replayed against the current document. `routing` is the routing
    /// key the rejected write used, if any.
    async fn on_conflict(&self, _id: &str, _routing: Option<&str>, _transform: Transform) {}

    /// One item failed.
    fn on_error(&self, _code: &str, _details: &Value) {}

    /// A whole request failed (transport error, shutdown timeout).
    fn on_fail(&self, _description: &str) {}

    /// A batch response was processed.
    fn on_flush(&self) {}

    /// The writer was closed.
    fn on_done(&self) {}

    /// Aggregate counts so far.
    fn status(&self) -> StatusSummary;
}

/// Thread-safe counters backing a [`StatusSummary`].
#[derive(Debug, Default)]
pub struct StatusCounters {
    ok: AtomicU64,
    errors: AtomicU64,
    conflicts: AtomicU64,
    failures: AtomicU64,
}

impl StatusCounters {
    pub fn ok(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> StatusSummary {
        StatusSummary {
            ok: self.ok.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Counts outcomes and logs problems.
///
/// Unresolved conflicts are counted separately from hard errors; a run is
/// successful only when neither occurred.
#[derive(Debug)]
pub struct LoggingStatusHandler {
    name: String,
    verbose: bool,
    counters: StatusCounters,
}

impl LoggingStatusHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbose: false,
            counters: StatusCounters::default(),
        }
    }

    /// Log the running status after every flush.
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

#[async_trait]
impl StatusHandler for LoggingStatusHandler {
    fn on_start(&self) {
        info!(name = %self.name, "Bulk write started");
    }

    fn on_ok(&self, _item: &Value) {
        self.counters.ok();
    }

    async fn on_conflict(&self, id: &str, _routing: Option<&str>, _transform: Transform) {
        warn!(name = %self.name, id = %id, "Unresolved version conflict");
        self.counters.conflict();
    }

    fn on_error(&self, code: &str, details: &Value) {
        error!(name = %self.name, code = %code, details = %details, "Bulk item failed");
        self.counters.error();
    }

    fn on_fail(&self, description: &str) {
        error!(name = %self.name, description = %description, "Bulk request failed");
        self.counters.failure();
    }

    fn on_flush(&self) {
        if self.verbose {
            let status = self.counters.summary();
            info!(name = %self.name, ok = status.ok, errors = status.errors, "Flushed batch");
        }
    }

    fn on_done(&self) {
        let status = self.counters.summary();
        info!(
            name = %self.name,
            ok = status.ok,
            errors = status.errors,
            conflicts = status.conflicts,
            failures = status.failures,
            success = status.is_success(),
            "Bulk write done"
        );
    }

    fn status(&self) -> StatusSummary {
        self.counters.summary()
    }
}

/// Resolves bulk conflicts by re-running the optimistic update loop for the
/// conflicting document.
///
/// A resolved conflict counts as ok; a conflict that still fails after the
/// loop's retries is logged and counted as an error, never raised.
pub struct ConflictResolvingHandler {
    updater: Arc<OptimisticUpdater>,
    index: String,
    doc_type: Option<String>,
    counters: StatusCounters,
}

impl ConflictResolvingHandler {
    pub fn new(updater: Arc<OptimisticUpdater>, index: impl Into<String>) -> Self {
        Self {
            updater,
            index: index.into(),
            doc_type: None,
            counters: StatusCounters::default(),
        }
    }

    pub fn with_type(mut self, doc_type: Option<String>) -> Self {
        self.doc_type = doc_type;
        self
    }
}

#[async_trait]
impl StatusHandler for ConflictResolvingHandler {
    fn on_ok(&self, _item: &Value) {
        self.counters.ok();
    }

    async fn on_conflict(&self, id: &str, routing: Option<&str>, transform: Transform) {
        let doc = DocumentRef::new(self.index.as_str(), id)
            .with_type(self.doc_type.clone())
            .with_routing(routing.map(str::to_string));
        match self.updater.update(&doc, &transform).await {
            Ok(updated) => {
                debug!(index = %self.index, id = %id, version = updated.version, "Resolved conflict");
                self.counters.ok();
            }
            Err(e) => {
                error!(index = %self.index, id = %id, error = %e, "Could not resolve conflict");
                self.counters.error();
            }
        }
    }

    fn on_error(&self, code: &str, details: &Value) {
        error!(index = %self.index, code = %code, details = %details, "Bulk item failed");
        self.counters.error();
    }

    fn on_fail(&self, description: &str) {
        error!(index = %self.index, description = %description, "Bulk request failed");
        self.counters.failure();
    }

    fn status(&self) -> StatusSummary {
        self.counters.summary()
    }
}
