//! In-memory search engine used by the scenario tests.
//!
//! Models just enough of the engine's HTTP API for the write path: versioned
//! documents, aliases, bulk requests, scrolls and the `match_all`, `range`
//! and `ids` queries.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use search_writer_pipeline::bulk::codec;
use search_writer_repository::{HttpMethod, RequestBody, SearchApiClient, SearchError, SearchTransport};
use search_writer_shared::Document;

#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub version: u64,
    pub doc_type: Option<String>,
    pub routing: Option<String>,
    pub source: Document,
}

#[derive(Default)]
struct Index {
    docs: BTreeMap<String, StoredDoc>,
    mapping: Value,
}

struct Scroll {
    index: String,
    remaining: VecDeque<Value>,
    page_size: usize,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, Index>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    scrolls: HashMap<String, Scroll>,
    next_id: u64,
    next_scroll: u64,
    rejected_index: Option<String>,
    failing_scroll_pages: bool,
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
    calls: Mutex<Vec<(HttpMethod, String)>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn client(self: &Arc<Self>) -> SearchApiClient {
        SearchApiClient::new(self.clone())
    }

    /// Number of requests sent so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Requests sent after the first `from` ones.
    pub fn calls_since(&self, from: usize) -> Vec<(HttpMethod, String)> {
        self.calls.lock().unwrap()[from..].to_vec()
    }

    pub fn count_calls(&self, method: HttpMethod, path_prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p)| *m == method && p.starts_with(path_prefix))
            .count()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().unwrap().indices.keys().cloned().collect()
    }

    pub fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .aliases
            .get(alias)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn documents(&self, index: &str) -> BTreeMap<String, StoredDoc> {
        let state = self.state.lock().unwrap();
        resolve(&state, index)
            .ok()
            .and_then(|name| state.indices.get(&name))
            .map(|idx| idx.docs.clone())
            .unwrap_or_default()
    }

    pub fn create_index(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .indices
            .insert(name.to_string(), Index::default());
    }

    pub fn add_alias(&self, alias: &str, index: &str) {
        self.state
            .lock()
            .unwrap()
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
    }

    /// Answer every bulk item written into `index` with a mapping error.
    pub fn reject_bulk_writes_into(&self, index: &str) {
        self.state.lock().unwrap().rejected_index = Some(index.to_string());
    }

    /// Fail every scroll page fetch after the first page.
    pub fn fail_scroll_pages(&self) {
        self.state.lock().unwrap().failing_scroll_pages = true;
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.rejected_index = None;
        state.failing_scroll_pages = false;
    }

    /// Scroll contexts that were opened and not yet cleared.
    pub fn open_scrolls(&self) -> usize {
        self.state.lock().unwrap().scrolls.len()
    }

    pub fn put_raw(&self, index: &str, id: &str, source: Value) {
        self.put_routed(index, id, None, source);
    }

    pub fn put_routed(&self, index: &str, id: &str, routing: Option<&str>, source: Value) {
        let mut state = self.state.lock().unwrap();
        let idx = state.indices.entry(index.to_string()).or_default();
        let version = idx.docs.get(id).map(|d| d.version + 1).unwrap_or(1);
        idx.docs.insert(
            id.to_string(),
            StoredDoc {
                version,
                doc_type: None,
                routing: routing.map(str::to_string),
                source: source.as_object().cloned().unwrap_or_default(),
            },
        );
    }

    fn handle(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Value, SearchError> {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, parse_query(q)),
            None => (path, HashMap::new()),
        };
        let segments: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(percent_decode)
            .collect();
        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let json_body = match &body {
            Some(RequestBody::Json(v)) => v.clone(),
            _ => Value::Null,
        };

        let mut state = self.state.lock().unwrap();
        match (method, segs.as_slice()) {
            (HttpMethod::Get, ["_cluster", "health"]) => Ok(json!({"status": "green"})),
            (HttpMethod::Get, ["_aliases"]) => Ok(aliases_view(&state)),
            (HttpMethod::Get, ["_alias", alias]) => match state.aliases.get(*alias) {
                Some(set) if !set.is_empty() => {
                    let mut out = Map::new();
                    for index in set {
                        let mut names = Map::new();
                        names.insert(alias.to_string(), json!({}));
                        out.insert(index.clone(), json!({ "aliases": names }));
                    }
                    Ok(Value::Object(out))
                }
                _ => Err(SearchError::not_found(format!("alias [{}] missing", alias))),
            },
            (HttpMethod::Post, ["_aliases"]) => update_aliases(&mut state, &json_body),
            (HttpMethod::Post, ["_bulk"]) => match body {
                Some(RequestBody::NdJson(lines)) => bulk(&mut state, &lines),
                _ => Err(SearchError::bad_request("bulk needs an ndjson body")),
            },
            (HttpMethod::Post, ["_search", "scroll"]) if state.failing_scroll_pages => {
                Err(SearchError::unavailable("scroll page fetch failed"))
            }
            (HttpMethod::Post, ["_search", "scroll"]) => {
                let token = json_body["scroll_id"].as_str().unwrap_or_default().to_string();
                next_scroll_page(&mut state, &token)
            }
            (HttpMethod::Delete, ["_search", "scroll"]) => {
                let token = json_body["scroll_id"].as_str().unwrap_or_default();
                match state.scrolls.remove(token) {
                    Some(_) => Ok(json!({"succeeded": true})),
                    None => Err(SearchError::not_found("scroll missing")),
                }
            }
            (HttpMethod::Put, [index]) => {
                if state.indices.contains_key(*index) || state.aliases.contains_key(*index) {
                    return Err(SearchError::bad_request("resource_already_exists_exception"));
                }
                state.indices.insert(
                    index.to_string(),
                    Index {
                        docs: BTreeMap::new(),
                        mapping: json_body,
                    },
                );
                Ok(json!({"acknowledged": true}))
            }
            (HttpMethod::Delete, [index]) => {
                if state.indices.remove(*index).is_none() {
                    return Err(SearchError::not_found(format!("index [{}] missing", index)));
                }
                for set in state.aliases.values_mut() {
                    set.remove(*index);
                }
                state.aliases.retain(|_, set| !set.is_empty());
                Ok(json!({"acknowledged": true}))
            }
            (HttpMethod::Get, [index, "_settings"]) => {
                resolve_any(&state, index)?;
                Ok(json!({}))
            }
            (HttpMethod::Post, [index, "_refresh"]) => {
                resolve(&state, index)?;
                Ok(json!({"_shards": {"failed": 0}}))
            }
            (HttpMethod::Get, [index, "_mapping"]) => {
                let name = resolve(&state, index)?;
                let mut out = Map::new();
                out.insert(name.clone(), state.indices[&name].mapping.clone());
                Ok(Value::Object(out))
            }
            (HttpMethod::Post, [index, "_search"]) => search(&mut state, index, &json_body, &query),
            (HttpMethod::Post, [index, "_count"]) => {
                let name = resolve(&state, index)?;
                let count = matching(&state.indices[&name], &json_body["query"])?.len();
                Ok(json!({ "count": count }))
            }
            (HttpMethod::Post, [index, "_mget"]) => {
                let name = resolve(&state, index)?;
                let idx = &state.indices[&name];
                let docs: Vec<Value> = json_body["ids"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|id| match idx.docs.get(id) {
                        Some(doc) => hit(&name, id, doc),
                        None => json!({"_index": name, "_id": id, "found": false}),
                    })
                    .collect();
                Ok(json!({ "docs": docs }))
            }
            (HttpMethod::Post, [index, doc_type]) => {
                let name = resolve(&state, index)?;
                state.next_id += 1;
                let id = format!("gen-{}", state.next_id);
                let source = json_body.as_object().cloned().unwrap_or_default();
                let version = write(&mut state, &name, &id, doc_type, None, None, false, source)?;
                Ok(json!({"_index": name, "_id": id, "_version": version, "result": "created"}))
            }
            (HttpMethod::Get, [index, _doc_type, id]) => {
                let name = resolve(&state, index)?;
                match state.indices[&name].docs.get(*id) {
                    Some(doc) if routed(doc, query.get("routing")) => Ok(hit(&name, id, doc)),
                    _ => Err(SearchError::not_found(format!("{}/{}", name, id))),
                }
            }
            (HttpMethod::Put, [index, doc_type, id]) => {
                let name = resolve(&state, index)?;
                let version = query.get("version").and_then(|v| v.parse().ok());
                let create = query.get("op_type").map(String::as_str) == Some("create");
                let source = json_body.as_object().cloned().unwrap_or_default();
                let routing = query.get("routing").cloned();
                let version = write(&mut state, &name, id, doc_type, routing, version, create, source)?;
                Ok(json!({"_index": name, "_id": id, "_version": version, "result": "updated"}))
            }
            (HttpMethod::Delete, [index, _doc_type, id]) => {
                let name = resolve(&state, index)?;
                let expected: Option<u64> = query.get("version").and_then(|v| v.parse().ok());
                let idx = state
                    .indices
                    .get_mut(&name)
                    .ok_or_else(|| SearchError::not_found(name.clone()))?;
                let current = idx
                    .docs
                    .get(*id)
                    .filter(|doc| routed(doc, query.get("routing")))
                    .ok_or_else(|| SearchError::not_found(format!("{}/{}", name, id)))?
                    .version;
                if let Some(expected) = expected {
                    if expected != current {
                        return Err(SearchError::version_conflict(conflict_reason(id, current, expected)));
                    }
                }
                idx.docs.remove(*id);
                Ok(json!({"_id": id, "_version": current + 1, "result": "deleted"}))
            }
            _ => Err(SearchError::bad_request(format!("unsupported {} {}", method, path))),
        }
    }
}

#[async_trait]
impl SearchTransport for FakeEngine {
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Value, SearchError> {
        // Give concurrent callers a chance to interleave between requests.
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push((method, path.to_string()));
        self.handle(method, path, body)
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), percent_decode(v)))
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(if bytes[i] == b'+' { b' ' } else { bytes[i] });
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A routed document is only visible to requests that carry its routing.
fn routed(doc: &StoredDoc, routing: Option<&String>) -> bool {
    doc.routing.as_ref() == routing
}

/// Resolve an index or single-index alias to a physical index name.
fn resolve(state: &State, name: &str) -> Result<String, SearchError> {
    if state.indices.contains_key(name) {
        return Ok(name.to_string());
    }
    match state.aliases.get(name) {
        Some(set) if set.len() == 1 => Ok(set.iter().next().cloned().unwrap_or_default()),
        Some(set) if set.len() > 1 => Err(SearchError::bad_request(format!(
            "alias [{}] has more than one index",
            name
        ))),
        _ => Err(SearchError::not_found(format!("no such index [{}]", name))),
    }
}

fn resolve_any(state: &State, name: &str) -> Result<(), SearchError> {
    if state.indices.contains_key(name) || state.aliases.get(name).is_some_and(|s| !s.is_empty()) {
        Ok(())
    } else {
        Err(SearchError::not_found(format!("no such index [{}]", name)))
    }
}

fn aliases_view(state: &State) -> Value {
    let mut out = Map::new();
    for name in state.indices.keys() {
        let mut aliases = Map::new();
        for (alias, set) in &state.aliases {
            if set.contains(name) {
                aliases.insert(alias.clone(), json!({}));
            }
        }
        out.insert(name.clone(), json!({ "aliases": aliases }));
    }
    Value::Object(out)
}

fn update_aliases(state: &mut State, body: &Value) -> Result<Value, SearchError> {
    let actions = body["actions"]
        .as_array()
        .ok_or_else(|| SearchError::bad_request("actions missing"))?;
    for action in actions {
        for op in ["add", "remove"] {
            if let Some(spec) = action.get(op) {
                let index = spec["index"].as_str().unwrap_or_default();
                if !state.indices.contains_key(index) {
                    return Err(SearchError::not_found(format!("no such index [{}]", index)));
                }
            }
        }
    }
    for action in actions {
        if let Some(spec) = action.get("remove") {
            let alias = spec["alias"].as_str().unwrap_or_default();
            let index = spec["index"].as_str().unwrap_or_default();
            if let Some(set) = state.aliases.get_mut(alias) {
                set.remove(index);
            }
        }
        if let Some(spec) = action.get("add") {
            let alias = spec["alias"].as_str().unwrap_or_default().to_string();
            let index = spec["index"].as_str().unwrap_or_default().to_string();
            state.aliases.entry(alias).or_default().insert(index);
        }
    }
    state.aliases.retain(|_, set| !set.is_empty());
    Ok(json!({"acknowledged": true}))
}

fn conflict_reason(id: &str, current: u64, provided: u64) -> String {
    format!(
        "[_doc][{}]: version conflict, current [{}], provided [{}]",
        id, current, provided
    )
}

#[allow(clippy::too_many_arguments)]
fn write(
    state: &mut State,
    index: &str,
    id: &str,
    doc_type: &str,
    routing: Option<String>,
    expected: Option<u64>,
    create: bool,
    source: Document,
) -> Result<u64, SearchError> {
    let idx = state
        .indices
        .get_mut(index)
        .ok_or_else(|| SearchError::not_found(index.to_string()))?;
    let current = idx.docs.get(id).map(|d| d.version);

    if create && current.is_some() {
        return Err(SearchError::version_conflict(format!(
            "[{}]: version conflict, document already exists (current version [{}])",
            id,
            current.unwrap_or_default()
        )));
    }
    if let Some(expected) = expected {
        if current != Some(expected) {
            return Err(SearchError::version_conflict(conflict_reason(
                id,
                current.unwrap_or_default(),
                expected,
            )));
        }
    }

    let version = current.map(|v| v + 1).unwrap_or(1);
    idx.docs.insert(
        id.to_string(),
        StoredDoc {
            version,
            doc_type: (doc_type != "_doc").then(|| doc_type.to_string()),
            routing,
            source,
        },
    );
    Ok(version)
}

fn bulk(state: &mut State, body: &str) -> Result<Value, SearchError> {
    let entries = codec::decode(body)?;
    let mut items = Vec::with_capacity(entries.len());
    let mut errors = false;

    for entry in entries {
        let meta = &entry.metadata;
        let target = meta.get("_index").and_then(Value::as_str).unwrap_or_default();
        let doc_type = meta.get("_type").and_then(Value::as_str).unwrap_or("_doc");
        let routing = meta.get("routing").and_then(Value::as_str).map(str::to_string);
        let version = meta.get("version").and_then(Value::as_u64);

        let item = match resolve(state, target) {
            Err(e) => {
                errors = true;
                json!({"status": 404, "error": {"type": "index_not_found_exception", "reason": e.to_string()}})
            }
            Ok(name) if state.rejected_index.as_deref() == Some(name.as_str()) => {
                errors = true;
                json!({"_index": name, "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse"
                }})
            }
            Ok(name) if entry.action == "delete" => {
                let id = meta.get("_id").and_then(Value::as_str).unwrap_or_default();
                let idx = state.indices.get_mut(&name).map(|idx| &mut idx.docs);
                match idx.and_then(|docs| docs.remove(id)) {
                    Some(doc) => json!({"_index": name, "_id": id, "_version": doc.version + 1, "status": 200, "result": "deleted"}),
                    None => json!({"_index": name, "_id": id, "status": 404, "result": "not_found"}),
                }
            }
            Ok(name) => {
                let id = match meta.get("_id").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => {
                        state.next_id += 1;
                        format!("gen-{}", state.next_id)
                    }
                };
                let source = entry.document.unwrap_or_default();
                match write(state, &name, &id, doc_type, routing, version, false, source) {
                    Ok(version) => json!({"_index": name, "_id": id, "_version": version, "status": 201, "result": "created"}),
                    Err(SearchError::VersionConflict(reason)) => {
                        errors = true;
                        json!({"_index": name, "_id": id, "status": 409, "error": {
                            "type": "version_conflict_engine_exception",
                            "reason": reason
                        }})
                    }
                    Err(e) => {
                        errors = true;
                        json!({"_id": id, "status": 500, "error": {"type": "engine_exception", "reason": e.to_string()}})
                    }
                }
            }
        };

        let mut wrapped = Map::new();
        wrapped.insert(entry.action.clone(), item);
        items.push(Value::Object(wrapped));
    }

    Ok(json!({"took": 1, "errors": errors, "items": items}))
}

fn hit(index: &str, id: &str, doc: &StoredDoc) -> Value {
    let mut hit = json!({
        "_index": index,
        "_id": id,
        "_version": doc.version,
        "found": true,
        "_source": doc.source,
    });
    if let Some(doc_type) = &doc.doc_type {
        hit["_type"] = json!(doc_type);
    }
    if let Some(routing) = &doc.routing {
        hit["_routing"] = json!(routing);
    }
    hit
}

fn matching(index: &Index, query: &Value) -> Result<Vec<(String, StoredDoc)>, SearchError> {
    let all = index.docs.iter().map(|(id, doc)| (id.clone(), doc.clone()));
    if query.is_null() || query.get("match_all").is_some() {
        return Ok(all.collect());
    }
    if let Some(range) = query.get("range").and_then(Value::as_object) {
        let (field, bounds) = range
            .iter()
            .next()
            .ok_or_else(|| SearchError::bad_request("empty range"))?;
        let gte = bounds["gte"].as_str().unwrap_or_default().to_string();
        let field = field.clone();
        return Ok(all
            .filter(|(_, doc)| {
                doc.source
                    .get(&field)
                    .and_then(Value::as_str)
                    .is_some_and(|value| value >= gte.as_str())
            })
            .collect());
    }
    if let Some(values) = query.pointer("/ids/values").and_then(Value::as_array) {
        let wanted: BTreeSet<&str> = values.iter().filter_map(Value::as_str).collect();
        return Ok(all.filter(|(id, _)| wanted.contains(id.as_str())).collect());
    }
    Err(SearchError::bad_request(format!("unsupported query {}", query)))
}

fn search(
    state: &mut State,
    index: &str,
    body: &Value,
    params: &HashMap<String, String>,
) -> Result<Value, SearchError> {
    let name = resolve(state, index)?;
    let matches = matching(&state.indices[&name], &body["query"])?;
    let total = matches.len();
    let hits: Vec<Value> = matches
        .iter()
        .map(|(id, doc)| {
            let mut h = hit(&name, id, doc);
            if let Some(obj) = h.as_object_mut() {
                obj.remove("found");
            }
            h
        })
        .collect();
    let size = body["size"].as_u64().unwrap_or(10) as usize;

    if params.contains_key("scroll") {
        state.next_scroll += 1;
        let token = format!("scroll-{}", state.next_scroll);
        let mut remaining: VecDeque<Value> = hits.into();
        let n = size.min(remaining.len());
        let first: Vec<Value> = remaining.drain(..n).collect();
        state.scrolls.insert(
            token.clone(),
            Scroll {
                index: name,
                remaining,
                page_size: size,
            },
        );
        return Ok(json!({"_scroll_id": token, "hits": {"total": {"value": total}, "hits": first}}));
    }

    let from = body["from"].as_u64().unwrap_or(0) as usize;
    let page: Vec<Value> = hits.into_iter().skip(from).take(size).collect();
    Ok(json!({"hits": {"total": total, "hits": page}}))
}

fn next_scroll_page(state: &mut State, token: &str) -> Result<Value, SearchError> {
    let scroll = state
        .scrolls
        .get_mut(token)
        .ok_or_else(|| SearchError::not_found(format!("scroll [{}] expired", token)))?;
    let n = scroll.page_size.min(scroll.remaining.len());
    let page: Vec<Value> = scroll.remaining.drain(..n).collect();
    Ok(json!({"_scroll_id": token, "hits": {"total": page.len(), "hits": page}}))
}
