//! Zero-downtime index migration.
//!
//! Readers and writers address an alias. A migration builds the next index
//! generation (`<alias>_v<version>`), copies the live data into it, switches
//! the alias over in one call and then copies whatever was written to the old
//! generation while the first copy ran. The old generation is deleted only
//! when both copies reported no errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use search_writer_repository::{queries, AliasAction, SearchApiClient, SearchError};
use search_writer_shared::{IndexDescriptor, Operation, StatusSummary};

use crate::bulk::{BulkWriteBuffer, BulkWriterConfig};
use crate::errors::PipelineError;
use crate::scroll::{ScrollConfig, ScrollCursor};
use crate::status::{LoggingStatusHandler, StatusHandler};

/// Configuration for [`IndexMigrator`].
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Operations per bulk request while copying.
    pub batch_size: usize,
    /// Concurrent bulk requests while copying.
    pub workers: usize,
    /// Hits per scroll page.
    pub page_size: usize,
    /// Scroll keep-alive.
    pub ttl: String,
    /// How long to wait for outstanding bulk requests after each pass.
    pub close_timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: 9,
            page_size: 1000,
            ttl: "20m".to_string(),
            close_timeout: Duration::from_secs(20 * 60),
        }
    }
}

impl MigrationConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// What a call to [`IndexMigrator::migrate`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// The alias already points at the target generation.
    NotNeeded,
    /// The alias did not exist; it now points at a new, empty index.
    Created { index: String },
    /// Data was copied from `from` into `to`, and `from` was deleted.
    Migrated {
        from: String,
        to: String,
        first_pass: StatusSummary,
        second_pass: StatusSummary,
    },
}

/// Alias-based blue/green reindexing.
pub struct IndexMigrator {
    client: SearchApiClient,
    config: MigrationConfig,
}

impl IndexMigrator {
    pub fn new(client: SearchApiClient) -> Self {
        Self::with_config(client, MigrationConfig::default())
    }

    pub fn with_config(client: SearchApiClient, config: MigrationConfig) -> Self {
        Self { client, config }
    }

    /// Bring `descriptor.alias` to `descriptor.version`.
    ///
    /// Safe to call repeatedly: once the alias points at the target index,
    /// further calls return [`MigrationOutcome::NotNeeded`] without mutating
    /// anything.
    ///
    /// # Errors
    ///
    /// * `CorruptState` - The alias points at several indices, or an index
    ///   exists under the alias name itself. Nothing is changed.
    /// * `ReindexIncomplete` - A copy pass reported errors. The old index is kept.
    #[instrument(skip(self, descriptor), fields(alias = %descriptor.alias, version = descriptor.version))]
    pub async fn migrate(
        &self,
        descriptor: &IndexDescriptor,
    ) -> Result<MigrationOutcome, PipelineError> {
        let alias = descriptor.alias.as_str();
        let target = descriptor.index_name();

        let current = self.client.indices_for(alias).await?;
        if current.len() > 1 {
            return Err(SearchError::corrupt_state(format!(
                "alias {} points at more than one index: {:?}",
                alias, current
            ))
            .into());
        }
        if current.first() == Some(&target) {
            info!(index = %target, "No migration needed");
            return Ok(MigrationOutcome::NotNeeded);
        }
        if current.is_empty() && self.client.index_exists(alias).await? {
            return Err(SearchError::corrupt_state(format!(
                "an index named like the alias {} already exists",
                alias
            ))
            .into());
        }

        if !self.client.index_exists(&target).await? {
            self.client
                .create_index_from_resource(
                    &target,
                    &descriptor.mapping_resource,
                    descriptor.replicas,
                )
                .await?;
        }

        let Some(old) = current.into_iter().next() else {
            self.client
                .update_aliases(&[AliasAction::add(target.as_str(), alias)])
                .await?;
            info!(index = %target, "Created index and alias");
            return Ok(MigrationOutcome::Created { index: target });
        };

        let started = Utc::now();
        info!(from = %old, to = %target, "Migrating index");

        self.client.refresh(&old).await?;
        let first_pass = self.reindex(&old, &target, queries::match_all()).await?;
        ensure_complete(&old, &target, first_pass)?;

        self.client
            .update_aliases(&[
                AliasAction::remove(old.as_str(), alias),
                AliasAction::add(target.as_str(), alias),
            ])
            .await?;
        info!(from = %old, to = %target, "Alias switched");

        self.client.refresh(&old).await?;
        let since = catch_up_start(started, descriptor.safety_skew);
        let second_pass = self
            .reindex(
                &old,
                &target,
                queries::range_from(&descriptor.modified_field, &since),
            )
            .await?;
        ensure_complete(&old, &target, second_pass)?;

        self.client.delete_index(&old).await?;
        info!(from = %old, to = %target, "Migration complete, old index removed");

        Ok(MigrationOutcome::Migrated {
            from: old,
            to: target,
            first_pass,
            second_pass,
        })
    }

    /// Copy every document matching `clause` from `from` into `to`,
    /// preserving id, type and routing.
    #[instrument(skip(self, clause))]
    pub async fn reindex(
        &self,
        from: &str,
        to: &str,
        clause: Value,
    ) -> Result<StatusSummary, PipelineError> {
        let handler = Arc::new(LoggingStatusHandler::new(format!("reindex {} -> {}", from, to)));
        let writer = BulkWriteBuffer::new(
            self.client.clone(),
            to,
            handler.clone(),
            BulkWriterConfig::default()
                .with_batch_size(self.config.batch_size)
                .with_workers(self.config.workers)
                .with_close_timeout(self.config.close_timeout)
                .with_updated_at_field(None),
        )?;

        let copied = self.copy_hits(from, clause, &writer).await;
        let closed = writer.close().await;
        copied?;

        match closed {
            Ok(summary) => Ok(summary),
            // Pool failures were already counted by the handler.
            Err(SearchError::BulkFlushError(msg)) => {
                warn!(reason = %msg, "Reindex had failed bulk requests");
                Ok(handler.status())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_hits(
        &self,
        from: &str,
        clause: Value,
        writer: &BulkWriteBuffer,
    ) -> Result<u64, PipelineError> {
        let scroll = ScrollConfig::new(self.config.page_size, self.config.ttl.clone());
        let mut cursor = ScrollCursor::open(self.client.clone(), from, clause, &scroll).await?;
        let expected = cursor.total();

        let copied = replay_hits(&mut cursor, writer).await;
        if let Err(e) = cursor.close().await {
            warn!(error = %e, "Failed to clear reindex scroll");
        }
        let copied = copied?;

        info!(copied = copied, expected = expected, "Scrolled source index");
        Ok(copied)
    }
}

async fn replay_hits(
    cursor: &mut ScrollCursor,
    writer: &BulkWriteBuffer,
) -> Result<u64, PipelineError> {
    let mut copied = 0u64;
    while let Some(hit) = cursor.next().await? {
        let mut op = Operation::index(Some(hit.id), hit.source);
        op.doc_type = hit.doc_type;
        op.routing = hit.routing;
        writer.enqueue(op).await?;
        copied += 1;
    }
    Ok(copied)
}

fn ensure_complete(old: &str, target: &str, summary: StatusSummary) -> Result<(), PipelineError> {
    if summary.is_success() {
        return Ok(());
    }
    error!(
        from = %old,
        to = %target,
        errors = summary.errors,
        failures = summary.failures,
        "Reindex incomplete, keeping old index"
    );
    Err(PipelineError::ReindexIncomplete {
        old_index: old.to_string(),
        target_index: target.to_string(),
        summary,
    })
}

/// Lower bound for the catch-up pass, formatted like the timestamp fields.
fn catch_up_start(started: DateTime<Utc>, skew: Duration) -> String {
    let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
    (started - skew).to_rfc3339_opts(SecondsFormat::Millis, true)
}
