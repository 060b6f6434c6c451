//! Write operations accepted by the bulk writer.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{strip_reserved_fields, Document};

/// A pure function deriving a new document from the current one.
///
/// Kept alongside update operations so a conflicting write can be replayed
/// against a fresher copy of the document.
pub type Transform = Arc<dyn Fn(Document) -> Document + Send + Sync>;

/// Wrap a closure as a [`Transform`].
pub fn transform<F>(f: F) -> Transform
where
    F: Fn(Document) -> Document + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The kind of write carried by an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Index,
    Update,
    Delete,
}

impl OperationKind {
    /// The bulk action name this operation is rendered as.
    ///
    /// Updates are full-document replacements guarded by the expected
    /// version, so they travel as `index` actions.
    pub fn action(&self) -> &'static str {
        match self {
            OperationKind::Index | OperationKind::Update => "index",
            OperationKind::Delete => "delete",
        }
    }
}

/// One write destined for a bulk request.
#[derive(Clone)]
pub struct Operation {
    pub kind: OperationKind,
    /// Document id; `None` lets the engine generate one (index only).
    pub id: Option<String>,
    /// Type/collection name.
    pub doc_type: Option<String>,
    /// Parent/routing key.
    pub routing: Option<String>,
    /// Expected version; when set the engine rejects the write on mismatch.
    pub version: Option<u64>,
    /// Document body; absent for deletes.
    pub payload: Option<Document>,
    /// Update only: how the payload was derived, for conflict replay.
    pub transform: Option<Transform>,
}

impl Operation {
    /// Index (create or replace) a document.
    pub fn index(id: Option<String>, payload: Document) -> Self {
        Self {
            kind: OperationKind::Index,
            id,
            doc_type: None,
            routing: None,
            version: None,
            payload: Some(payload),
            transform: None,
        }
    }

    /// Build an index operation from a document carrying its own metadata.
    ///
    /// The id is taken from the `id` field, the expected version from `_version`
    /// and the type from `_type`; reserved fields are stripped from the payload.
    pub fn from_document(mut doc: Document) -> Self {
        let id = doc.get("id").and_then(value_as_string);
        let version = doc.get("_version").and_then(value_as_u64);
        let doc_type = doc.get("_type").and_then(value_as_string);
        strip_reserved_fields(&mut doc);

        let mut op = Self::index(id, doc);
        op.version = version;
        op.doc_type = doc_type;
        op
    }

    /// Replace a document with the result of `transform`, guarded by `version`.
    pub fn update(
        id: impl Into<String>,
        version: Option<u64>,
        payload: Document,
        transform: Transform,
    ) -> Self {
        Self {
            kind: OperationKind::Update,
            id: Some(id.into()),
            doc_type: None,
            routing: None,
            version,
            payload: Some(payload),
            transform: Some(transform),
        }
    }

    /// Delete a document by id.
    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            id: Some(id.into()),
            doc_type: None,
            routing: None,
            version: None,
            payload: None,
            transform: None,
        }
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("doc_type", &self.doc_type)
            .field("routing", &self.routing)
            .field("version", &self.version)
            .field("payload", &self.payload)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
