//! Document types.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured document as stored in the engine's `_source`.
pub type Document = Map<String, Value>;

/// Metadata keys that may ride along inside a document but are never sent as source.
const RESERVED_FIELDS: [&str; 4] = ["_version", "_type", "_id", "_routing"];

/// A document together with the engine metadata needed for versioned writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedDocument {
    /// The document id.
    pub id: String,
    /// The version the engine reported when the document was read or written.
    pub version: u64,
    /// Parent/routing key, if the document was routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    /// The document body.
    pub source: Document,
}

impl VersionedDocument {
    pub fn new(id: impl Into<String>, version: u64, source: Document) -> Self {
        Self {
            id: id.into(),
            version,
            routing: None,
            source,
        }
    }

    /// Set the routing key.
    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }
}

/// Remove engine metadata keys and null values from a document before it is written.
pub fn strip_reserved_fields(doc: &mut Document) {
    for key in RESERVED_FIELDS {
        doc.remove(key);
    }
    doc.retain(|_, v| !v.is_null());
}

/// Current time formatted the way timestamp fields are written (RFC 3339, millisecond precision, UTC).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
