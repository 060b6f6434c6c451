//! Document CRUD over one alias.
//!
//! Documents carry their own `id` field. Reads return the source with `id`
//! and `_version` filled in, so a document can be round-tripped through
//! [`Operation::from_document`].
//!
//! Child documents live on their parent's shard. The `*_with_parent` methods
//! route every call by the parent id; the plain methods do not route.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use search_writer_repository::{DocumentRef, SearchApiClient, SearchError};
use search_writer_shared::{
    now_timestamp, strip_reserved_fields, Document, Operation, SearchHit, StatusSummary,
    Transform, VersionedDocument,
};

use crate::bulk::{BulkWriteBuffer, BulkWriterConfig};
use crate::errors::PipelineError;
use crate::scroll::{ScrollConfig, ScrollCursor};
use crate::status::{ConflictResolvingHandler, LoggingStatusHandler};
use crate::update::{OptimisticUpdater, UpdateConfig};

pub const ID_FIELD: &str = "id";
pub const VERSION_FIELD: &str = "_version";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Create, read, update and delete documents of one alias and type.
pub struct DocumentDao {
    client: SearchApiClient,
    index: String,
    doc_type: Option<String>,
    updater: Arc<OptimisticUpdater>,
}

impl DocumentDao {
    pub fn new(client: SearchApiClient, index: impl Into<String>) -> Self {
        Self::with_config(client, index, UpdateConfig::default())
    }

    pub fn with_config(
        client: SearchApiClient,
        index: impl Into<String>,
        update_config: UpdateConfig,
    ) -> Self {
        let updater = Arc::new(OptimisticUpdater::with_config(client.clone(), update_config));
        Self {
            client,
            index: index.into(),
            doc_type: None,
            updater,
        }
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn doc_ref(&self, id: &str, parent: Option<&str>) -> DocumentRef {
        DocumentRef::new(self.index.as_str(), id)
            .with_type(self.doc_type.clone())
            .with_routing(parent.map(str::to_string))
    }

    /// Store a new document.
    ///
    /// An id is generated when the document has none. Timestamps are stamped
    /// and reserved `_` fields stripped. With `replace == false`, an existing
    /// document with the same id makes this fail with a version conflict.
    ///
    /// Returns the stored document including `id` and `_version`.
    pub async fn create(&self, doc: Document, replace: bool) -> Result<Document, PipelineError> {
        let id = document_id(&doc).unwrap_or_else(|| Uuid::new_v4().to_string());
        self.store(id, None, doc, replace).await
    }

    /// Store a new child document on its parent's shard.
    ///
    /// Unlike [`DocumentDao::create`], the document must already carry an id.
    pub async fn create_with_parent(
        &self,
        doc: Document,
        parent_id: &str,
        replace: bool,
    ) -> Result<Document, PipelineError> {
        let id = document_id(&doc)
            .ok_or_else(|| PipelineError::validation("child document has no id"))?;
        self.store(id, Some(parent_id), doc, replace).await
    }

    #[instrument(skip(self, doc), fields(index = %self.index))]
    async fn store(
        &self,
        id: String,
        parent: Option<&str>,
        mut doc: Document,
        replace: bool,
    ) -> Result<Document, PipelineError> {
        strip_reserved_fields(&mut doc);

        let now = now_timestamp();
        doc.insert(ID_FIELD.to_string(), Value::from(id.as_str()));
        doc.entry(CREATED_AT_FIELD.to_string())
            .or_insert_with(|| Value::from(now.as_str()));
        doc.insert(UPDATED_AT_FIELD.to_string(), Value::from(now));

        let version = self
            .client
            .create_document(&self.doc_ref(&id, parent), &doc, replace)
            .await?;
        debug!(id = %id, parent = ?parent, version = version, "Created document");

        doc.insert(VERSION_FIELD.to_string(), Value::from(version));
        Ok(doc)
    }

    /// Fetch a document; `None` if it does not exist.
    pub async fn get(&self, id: &str) -> Result<Option<Document>, PipelineError> {
        let doc = self.client.get_document(&self.doc_ref(id, None)).await?;
        Ok(doc.map(into_document))
    }

    /// Fetch a child document; `None` if it does not exist under `parent_id`.
    pub async fn get_with_parent(
        &self,
        id: &str,
        parent_id: &str,
    ) -> Result<Option<Document>, PipelineError> {
        let doc = self
            .client
            .get_document(&self.doc_ref(id, Some(parent_id)))
            .await?;
        Ok(doc.map(into_document))
    }

    /// Fetch several documents. Missing ids are skipped.
    pub async fn mget(&self, ids: &[String]) -> Result<Vec<Document>, PipelineError> {
        let docs = self.client.mget(&self.index, ids).await?;
        Ok(docs.into_iter().map(into_document).collect())
    }

    /// Apply `transform` to the current document, retrying on version conflicts.
    pub async fn update(
        &self,
        id: &str,
        modify_updated_at: bool,
        transform: Transform,
    ) -> Result<Document, PipelineError> {
        let updated = self
            .updater
            .update_with(&self.doc_ref(id, None), &transform, modify_updated_at)
            .await?;
        Ok(into_document(updated))
    }

    pub async fn update_with_parent(
        &self,
        id: &str,
        modify_updated_at: bool,
        transform: Transform,
        parent_id: &str,
    ) -> Result<Document, PipelineError> {
        let updated = self
            .updater
            .update_with(&self.doc_ref(id, Some(parent_id)), &transform, modify_updated_at)
            .await?;
        Ok(into_document(updated))
    }

    /// Delete a document. A missing document is an error.
    pub async fn delete(&self, id: &str) -> Result<(), PipelineError> {
        self.client
            .delete_document(&self.doc_ref(id, None), None)
            .await?;
        Ok(())
    }

    pub async fn delete_with_parent(&self, id: &str, parent_id: &str) -> Result<(), PipelineError> {
        self.client
            .delete_document(&self.doc_ref(id, Some(parent_id)), None)
            .await?;
        Ok(())
    }

    /// Delete every document matching `clause`.
    pub async fn delete_by_query(&self, clause: Value) -> Result<StatusSummary, PipelineError> {
        delete_by_query(&self.client, &self.index, clause, &ScrollConfig::default()).await
    }

    /// Offset-paginated search. Returns the total and the page of documents.
    pub async fn paged_search(
        &self,
        clause: Value,
        size: usize,
        from: usize,
    ) -> Result<(u64, Vec<Document>), PipelineError> {
        let results = self
            .client
            .paged_search(&self.index, clause, size, from)
            .await?;
        let docs = results
            .hits
            .iter()
            .map(hit_to_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((results.total, docs))
    }

    /// The first document matching `clause`, if any.
    pub async fn search_unique(&self, clause: Value) -> Result<Option<Document>, PipelineError> {
        let (total, mut docs) = self.paged_search(clause, 2, 0).await?;
        if total > 1 {
            warn!(index = %self.index, total = total, "Expected a unique match");
        }
        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.swap_remove(0))
        })
    }

    /// Open a scroll over the documents matching `clause`.
    pub async fn scroll(
        &self,
        clause: Value,
        config: &ScrollConfig,
    ) -> Result<ScrollCursor, PipelineError> {
        Ok(ScrollCursor::open(self.client.clone(), &self.index, clause, config).await?)
    }

    pub async fn count(&self, clause: Value) -> Result<u64, PipelineError> {
        Ok(self.client.count(&self.index, clause).await?)
    }

    pub async fn mapping(&self) -> Result<Value, PipelineError> {
        Ok(self.client.get_mapping(&self.index).await?)
    }

    /// A bulk writer for this alias whose conflicts are resolved by re-running
    /// the update loop for the conflicting document.
    pub fn bulk_writer(&self, config: BulkWriterConfig) -> Result<BulkWriteBuffer, PipelineError> {
        let handler = ConflictResolvingHandler::new(self.updater.clone(), self.index.as_str())
            .with_type(self.doc_type.clone());
        Ok(BulkWriteBuffer::new(
            self.client.clone(),
            self.index.as_str(),
            Arc::new(handler),
            config,
        )?)
    }

    /// Queue a document for indexing through `writer`, taking id, type and
    /// expected version from the document itself.
    pub async fn bulk_index(
        &self,
        writer: &BulkWriteBuffer,
        doc: Document,
    ) -> Result<(), PipelineError> {
        let mut op = Operation::from_document(doc);
        if op.doc_type.is_none() {
            op.doc_type = self.doc_type.clone();
        }
        writer.enqueue(op).await?;
        Ok(())
    }
}

/// Scroll the ids matching `clause` and delete them in bulk on a single worker.
#[instrument(skip(client, clause, scroll))]
pub async fn delete_by_query(
    client: &SearchApiClient,
    index: &str,
    clause: Value,
    scroll: &ScrollConfig,
) -> Result<StatusSummary, PipelineError> {
    let handler = Arc::new(LoggingStatusHandler::new(format!("delete-by-query {}", index)));
    let writer = BulkWriteBuffer::new(
        client.clone(),
        index,
        handler,
        BulkWriterConfig::default().with_batch_size(scroll.page_size.max(1)),
    )?;

    let mut cursor = ScrollCursor::open(client.clone(), index, clause, scroll).await?;
    let scheduled = schedule_deletes(&mut cursor, &writer).await;
    if let Err(e) = cursor.close().await {
        warn!(index = %index, error = %e, "Failed to clear delete-by-query scroll");
    }

    let summary = writer.close().await?;
    let scheduled = scheduled?;
    info!(index = %index, deleted = summary.ok, scheduled = scheduled, "Delete by query done");
    Ok(summary)
}

async fn schedule_deletes(
    cursor: &mut ScrollCursor,
    writer: &BulkWriteBuffer,
) -> Result<u64, PipelineError> {
    let mut scheduled = 0u64;
    while let Some(hit) = cursor.next().await? {
        let mut op = Operation::delete(hit.id);
        op.doc_type = hit.doc_type;
        op.routing = hit.routing;
        writer.enqueue(op).await?;
        scheduled += 1;
    }
    Ok(scheduled)
}

fn document_id(doc: &Document) -> Option<String> {
    match doc.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn into_document(doc: VersionedDocument) -> Document {
    let mut source = doc.source;
    source.insert(ID_FIELD.to_string(), Value::from(doc.id));
    source.insert(VERSION_FIELD.to_string(), Value::from(doc.version));
    source
}

fn hit_to_document(raw: &Value) -> Result<Document, SearchError> {
    let hit = SearchHit::from_value(raw)
        .ok_or_else(|| SearchError::parse(format!("unparsable search hit: {}", raw)))?;
    let mut source = hit.source;
    source.insert(ID_FIELD.to_string(), Value::from(hit.id));
    if let Some(version) = hit.version {
        source.insert(VERSION_FIELD.to_string(), Value::from(version));
    }
    Ok(source)
}
