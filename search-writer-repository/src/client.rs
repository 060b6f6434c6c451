//! Typed engine API.
//!
//! `SearchApiClient` turns document, bulk, scroll and index-admin calls into
//! requests on a [`SearchTransport`]. The write-path engines in the pipeline
//! crate only ever talk to the engine through this client.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use url::{Position, Url};

use search_writer_shared::{Document, VersionedDocument};

use crate::config::TransportConfig;
use crate::errors::SearchError;
use crate::interfaces::{HttpMethod, RequestBody, SearchTransport};
use crate::opensearch::{load_mapping, queries};
use crate::types::{parse_total, AliasAction, DocumentRef, PagedResults, ScrollPage};

const DEFAULT_DOC_TYPE: &str = "_doc";
const PATH_BASE: &str = "http://engine/";

/// Client for the engine's document, bulk, scroll and index APIs.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct SearchApiClient {
    transport: Arc<dyn SearchTransport>,
    config: TransportConfig,
}

impl SearchApiClient {
    /// Create a client with default configuration.
    pub fn new(transport: Arc<dyn SearchTransport>) -> Self {
        Self {
            transport,
            config: TransportConfig::default(),
        }
    }

    /// Create a client with custom configuration.
    pub fn with_config(transport: Arc<dyn SearchTransport>, config: TransportConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &Arc<dyn SearchTransport> {
        &self.transport
    }

    pub fn max_page_size(&self) -> usize {
        self.config.max_page_size
    }

    fn validate_page_size(&self, size: usize) -> Result<(), SearchError> {
        if size == 0 || size > self.config.max_page_size {
            return Err(SearchError::validation(format!(
                "page size {} outside 1..={}",
                size, self.config.max_page_size
            )));
        }
        Ok(())
    }

    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Value, SearchError> {
        self.transport.send(method, path, body).await
    }

    // ---- documents ----

    /// Fetch a document with its version.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(doc))` - The document and the version it was read at
    /// * `Ok(None)` - The document does not exist
    /// * `Err(SearchError)` - Any other failure
    pub async fn get_document(
        &self,
        doc: &DocumentRef,
    ) -> Result<Option<VersionedDocument>, SearchError> {
        let path = endpoint(&document_segments(doc), &routing_param(doc))?;
        let response = match self.send(HttpMethod::Get, &path, None).await {
            Ok(response) => response,
            Err(SearchError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        parse_found_document(&response, doc.routing.clone())
    }

    /// Fetch several documents by id. Missing ids are skipped.
    pub async fn mget(
        &self,
        index: &str,
        ids: &[String],
    ) -> Result<Vec<VersionedDocument>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let path = endpoint(&[index, "_mget"], &[])?;
        let response = self
            .send(HttpMethod::Post, &path, Some(RequestBody::Json(json!({ "ids": ids }))))
            .await?;

        let docs = response
            .get("docs")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::parse("mget response has no 'docs'"))?;

        let mut found = Vec::with_capacity(docs.len());
        for entry in docs {
            if let Some(doc) = parse_found_document(entry, None)? {
                found.push(doc);
            }
        }
        Ok(found)
    }

    /// Write a document, optionally requiring the stored version to match `version`.
    ///
    /// Returns the new version. A mismatch fails with [`SearchError::VersionConflict`].
    pub async fn put_document(
        &self,
        doc: &DocumentRef,
        version: Option<u64>,
        source: &Document,
    ) -> Result<u64, SearchError> {
        let mut params = routing_param(doc);
        if let Some(version) = version {
            params.push(("version", version.to_string()));
        }
        let path = endpoint(&document_segments(doc), &params)?;
        let response = self
            .send(
                HttpMethod::Put,
                &path,
                Some(RequestBody::Json(Value::Object(source.clone()))),
            )
            .await?;
        response_version(&response)
    }

    /// Store a document under a known id.
    ///
    /// With `replace == false` the write fails with [`SearchError::VersionConflict`]
    /// if the id is already taken.
    pub async fn create_document(
        &self,
        doc: &DocumentRef,
        source: &Document,
        replace: bool,
    ) -> Result<u64, SearchError> {
        let mut params = routing_param(doc);
        if !replace {
            params.push(("op_type", "create".to_string()));
        }
        let path = endpoint(&document_segments(doc), &params)?;
        let response = self
            .send(
                HttpMethod::Put,
                &path,
                Some(RequestBody::Json(Value::Object(source.clone()))),
            )
            .await?;
        response_version(&response)
    }

    /// Store a document under an engine-generated id. Returns `(id, version)`.
    pub async fn index_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        source: &Document,
    ) -> Result<(String, u64), SearchError> {
        let path = endpoint(&[index, doc_type.unwrap_or(DEFAULT_DOC_TYPE)], &[])?;
        let response = self
            .send(
                HttpMethod::Post,
                &path,
                Some(RequestBody::Json(Value::Object(source.clone()))),
            )
            .await?;
        let id = response
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| SearchError::parse("index response has no '_id'"))?
            .to_string();
        Ok((id, response_version(&response)?))
    }

    /// Delete a document, optionally requiring a version match.
    ///
    /// A missing document fails with [`SearchError::NotFound`].
    pub async fn delete_document(
        &self,
        doc: &DocumentRef,
        version: Option<u64>,
    ) -> Result<(), SearchError> {
        let mut params = routing_param(doc);
        if let Some(version) = version {
            params.push(("version", version.to_string()));
        }
        let path = endpoint(&document_segments(doc), &params)?;
        let response = self.send(HttpMethod::Delete, &path, None).await?;
        if response.get("result").and_then(Value::as_str) == Some("not_found") {
            return Err(SearchError::not_found(format!("{}/{}", doc.index, doc.id)));
        }
        Ok(())
    }

    // ---- bulk ----

    /// Send a rendered bulk body. Every metadata line names its target index.
    ///
    /// Item-level failures are reported inside the returned body, not as an error.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub async fn bulk(&self, body: String, refresh: bool) -> Result<Value, SearchError> {
        let params = if refresh {
            vec![("refresh", "true".to_string())]
        } else {
            Vec::new()
        };
        let path = endpoint(&["_bulk"], &params)?;
        self.send(HttpMethod::Post, &path, Some(RequestBody::NdJson(body)))
            .await
    }

    // ---- search ----

    /// Run a search with a full request body.
    pub async fn search(&self, index: &str, body: Value) -> Result<Value, SearchError> {
        let path = endpoint(&[index, "_search"], &[])?;
        self.send(HttpMethod::Post, &path, Some(RequestBody::Json(body.clone())))
            .await
            .map_err(|e| with_request_detail(e, index, &body))
    }

    /// Offset-paginated search for `clause`.
    pub async fn paged_search(
        &self,
        index: &str,
        clause: Value,
        size: usize,
        from: usize,
    ) -> Result<PagedResults, SearchError> {
        self.validate_page_size(size)?;
        let mut body = queries::query_with_version(clause);
        body["size"] = json!(size);
        body["from"] = json!(from);

        let response = self.search(index, body).await?;
        let page = ScrollPage::from_response(&response)?;
        Ok(PagedResults {
            total: page.total,
            hits: page.hits,
        })
    }

    /// Count documents matching `clause`.
    pub async fn count(&self, index: &str, clause: Value) -> Result<u64, SearchError> {
        let path = endpoint(&[index, "_count"], &[])?;
        let body = queries::query(clause);
        let response = self
            .send(HttpMethod::Post, &path, Some(RequestBody::Json(body.clone())))
            .await
            .map_err(|e| with_request_detail(e, index, &body))?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::parse("count response has no 'count'"))
    }

    // ---- scroll ----

    /// Open a scroll over `clause`. Hits carry their versions.
    pub async fn open_scroll(
        &self,
        index: &str,
        clause: Value,
        page_size: usize,
        ttl: &str,
    ) -> Result<ScrollPage, SearchError> {
        self.validate_page_size(page_size)?;
        let path = endpoint(&[index, "_search"], &[("scroll", ttl.to_string())])?;
        let mut body = queries::query_with_version(clause);
        body["size"] = json!(page_size);

        let response = self
            .send(HttpMethod::Post, &path, Some(RequestBody::Json(body.clone())))
            .await
            .map_err(|e| with_request_detail(e, index, &body))?;
        let page = ScrollPage::from_response(&response)?;
        debug!(index = %index, total = page.total, page = page.hits.len(), "Opened scroll");
        Ok(page)
    }

    /// Fetch the next scroll page.
    pub async fn scroll(&self, token: &str, ttl: &str) -> Result<ScrollPage, SearchError> {
        let path = endpoint(&["_search", "scroll"], &[])?;
        let body = json!({ "scroll": ttl, "scroll_id": token });
        let response = self
            .send(HttpMethod::Post, &path, Some(RequestBody::Json(body)))
            .await
            .map_err(|e| match e {
                SearchError::BadRequest(msg) => SearchError::bad_request(
                    json!({ "error": msg, "scroll_id": token }).to_string(),
                ),
                other => other,
            })?;
        ScrollPage::from_response(&response)
    }

    /// Release a scroll. Already-expired scrolls are ignored.
    pub async fn clear_scroll(&self, token: &str) -> Result<(), SearchError> {
        let path = endpoint(&["_search", "scroll"], &[])?;
        let body = json!({ "scroll_id": token });
        match self
            .send(HttpMethod::Delete, &path, Some(RequestBody::Json(body)))
            .await
        {
            Ok(_) | Err(SearchError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ---- indices and aliases ----

    /// Whether an index (or alias) with this name exists.
    pub async fn index_exists(&self, index: &str) -> Result<bool, SearchError> {
        let path = endpoint(&[index, "_settings"], &[])?;
        match self.send(HttpMethod::Get, &path, None).await {
            Ok(_) => Ok(true),
            Err(SearchError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create an index from a settings/mappings body.
    pub async fn create_index(&self, index: &str, mapping: &Value) -> Result<(), SearchError> {
        let path = endpoint(&[index], &[])?;
        self.send(HttpMethod::Put, &path, Some(RequestBody::Json(mapping.clone())))
            .await?;
        info!(index = %index, "Created index");
        Ok(())
    }

    /// Create an index from a mapping file, applying the replica override.
    pub async fn create_index_from_resource(
        &self,
        index: &str,
        resource: &Path,
        replicas: Option<u32>,
    ) -> Result<(), SearchError> {
        let mapping = load_mapping(resource, replicas).await?;
        self.create_index(index, &mapping).await
    }

    pub async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
        let path = endpoint(&[index], &[])?;
        self.send(HttpMethod::Delete, &path, None).await?;
        info!(index = %index, "Deleted index");
        Ok(())
    }

    /// Physical indices the alias points at, sorted. A missing alias yields none.
    pub async fn indices_for(&self, alias: &str) -> Result<Vec<String>, SearchError> {
        let path = endpoint(&["_alias", alias], &[])?;
        let response = match self.send(HttpMethod::Get, &path, None).await {
            Ok(response) => response,
            Err(SearchError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut indices: Vec<String> = response
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        indices.sort();
        Ok(indices)
    }

    /// Apply alias actions in a single atomic call.
    pub async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchError> {
        if actions.is_empty() {
            return Ok(());
        }
        let path = endpoint(&["_aliases"], &[])?;
        let body = json!({ "actions": actions.iter().map(AliasAction::to_json).collect::<Vec<_>>() });
        self.send(HttpMethod::Post, &path, Some(RequestBody::Json(body)))
            .await?;
        Ok(())
    }

    /// Point `alias` at `index`, deleting the index it replaced.
    ///
    /// Fails with [`SearchError::CorruptState`] if the alias is bound to more
    /// than one index.
    #[instrument(skip(self))]
    pub async fn swap_alias(&self, alias: &str, index: &str) -> Result<(), SearchError> {
        let current = self.indices_for(alias).await?;
        if current.len() > 1 {
            return Err(SearchError::corrupt_state(format!(
                "alias {} points at {} indices: {:?}",
                alias,
                current.len(),
                current
            )));
        }
        let old = current.into_iter().next();
        if old.as_deref() == Some(index) {
            return Ok(());
        }

        let mut actions = Vec::with_capacity(2);
        if let Some(old) = &old {
            actions.push(AliasAction::remove(old.clone(), alias));
        }
        actions.push(AliasAction::add(index, alias));
        self.update_aliases(&actions).await?;
        info!(alias = %alias, from = ?old, to = %index, "Swapped alias");

        if let Some(old) = old {
            self.delete_index(&old).await?;
        }
        Ok(())
    }

    pub async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        let path = endpoint(&[index, "_refresh"], &[])?;
        self.send(HttpMethod::Post, &path, None).await?;
        Ok(())
    }

    pub async fn get_mapping(&self, index: &str) -> Result<Value, SearchError> {
        let path = endpoint(&[index, "_mapping"], &[])?;
        self.send(HttpMethod::Get, &path, None).await
    }

    pub async fn get_aliases(&self) -> Result<Value, SearchError> {
        let path = endpoint(&["_aliases"], &[])?;
        self.send(HttpMethod::Get, &path, None).await
    }

    /// `true` unless the cluster reports status `red`.
    pub async fn health_check(&self) -> Result<bool, SearchError> {
        let path = endpoint(&["_cluster", "health"], &[])?;
        let response = self.send(HttpMethod::Get, &path, None).await?;
        let status = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("red");
        if status == "red" {
            warn!(status = %status, "Cluster unhealthy");
        }
        Ok(status != "red")
    }
}

/// Build a request path from unencoded segments and query parameters.
fn endpoint(segments: &[&str], params: &[(&str, String)]) -> Result<String, SearchError> {
    let mut url = Url::parse(PATH_BASE).map_err(|e| SearchError::validation(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| SearchError::validation("cannot build request path"))?
        .clear()
        .extend(segments);
    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url[Position::BeforePath..].to_string())
}

fn document_segments(doc: &DocumentRef) -> [&str; 3] {
    [
        doc.index.as_str(),
        doc.doc_type.as_deref().unwrap_or(DEFAULT_DOC_TYPE),
        doc.id.as_str(),
    ]
}

fn routing_param(doc: &DocumentRef) -> Vec<(&'static str, String)> {
    doc.routing
        .iter()
        .map(|routing| ("routing", routing.clone()))
        .collect()
}

fn response_version(response: &Value) -> Result<u64, SearchError> {
    response
        .get("_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| SearchError::parse("write response has no '_version'"))
}

/// Parse a get/mget entry; `None` when the engine reports `found: false`.
fn parse_found_document(
    entry: &Value,
    routing: Option<String>,
) -> Result<Option<VersionedDocument>, SearchError> {
    if entry.get("found").and_then(Value::as_bool) == Some(false) {
        return Ok(None);
    }
    let id = entry
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| SearchError::parse("document response has no '_id'"))?;
    let version = response_version(entry)?;
    let source = match entry.get("_source") {
        Some(Value::Object(source)) => source.clone(),
        _ => Map::new(),
    };
    let routing = entry
        .get("_routing")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(routing);

    Ok(Some(VersionedDocument {
        id: id.to_string(),
        version,
        routing,
        source,
    }))
}

/// Attach the offending request to a `BadRequest` so it can be diagnosed from logs.
fn with_request_detail(error: SearchError, index: &str, body: &Value) -> SearchError {
    match error {
        SearchError::BadRequest(msg) => SearchError::bad_request(
            json!({ "error": msg, "index": index, "query": body }).to_string(),
        ),
        other => other,
    }
}
