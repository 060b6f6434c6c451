//! Request and response types for the typed engine API.

use serde_json::{json, Value};

use crate::errors::SearchError;

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Index or alias holding the document.
    pub index: String,
    /// Mapping type; `None` uses the engine's default (`_doc`).
    pub doc_type: Option<String>,
    pub id: String,
    /// Parent/routing key.
    pub routing: Option<String>,
}

impl DocumentRef {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id: id.into(),
            routing: None,
        }
    }

    pub fn with_type(mut self, doc_type: Option<String>) -> Self {
        self.doc_type = doc_type;
        self
    }

    pub fn with_routing(mut self, routing: Option<String>) -> Self {
        self.routing = routing;
        self
    }
}

/// One page of a scroll.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
    /// Cursor token for the next page. Engines may rotate it between pages.
    pub token: Option<String>,
    /// Total matches known when the page was produced.
    pub total: u64,
    /// Raw hits, each carrying `_id`, `_source` and whatever metadata was requested.
    pub hits: Vec<Value>,
}

impl ScrollPage {
    /// Parse a search/scroll response body.
    pub(crate) fn from_response(response: &Value) -> Result<Self, SearchError> {
        let hits = response
            .get("hits")
            .ok_or_else(|| SearchError::parse("search response has no 'hits'"))?;

        Ok(Self {
            token: response
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            total: parse_total(hits.get("total"))?,
            hits: hits
                .get("hits")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A page of an offset-paginated search.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResults {
    pub total: u64,
    pub hits: Vec<Value>,
}

/// A single alias mutation. Several are applied atomically by one `_aliases` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AliasAction::Add { index, alias } => json!({"add": {"index": index, "alias": alias}}),
            AliasAction::Remove { index, alias } => {
                json!({"remove": {"index": index, "alias": alias}})
            }
        }
    }
}

/// `hits.total` is a plain number on older engines and `{"value": n}` on newer ones.
pub(crate) fn parse_total(total: Option<&Value>) -> Result<u64, SearchError> {
    match total {
        None => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| SearchError::parse(format!("invalid hit total: {}", n))),
        Some(Value::Object(obj)) => obj
            .get("value")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::parse("hit total object has no 'value'")),
        Some(other) => Err(SearchError::parse(format!("invalid hit total: {}", other))),
    }
}
