//! Raw search hits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, VersionedDocument};

/// One hit from a search or scroll page, with the metadata needed to replay it.
///
/// Serializes with the engine's own field names so hits can be written to a
/// backup file and read back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "_routing", default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Document,
}

impl SearchHit {
    /// Parse a hit from a raw response value; `None` if it has no `_id`.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Convert into a versioned document, if the hit carried a version.
    pub fn into_versioned(self) -> Option<VersionedDocument> {
        let version = self.version?;
        Some(VersionedDocument {
            id: self.id,
            version,
            routing: self.routing,
            source: self.source,
        })
    }
}
