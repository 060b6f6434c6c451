//! Query builders used by the write path.
//!
//! Only the handful of queries the bulk, scroll and migration code needs:
//! match-all, a lower-bounded range on a timestamp field, and id lookups.

use serde_json::{json, Value};

/// Match every document.
pub fn match_all() -> Value {
    json!({ "match_all": {} })
}

/// Match documents whose `field` is at or after `from` (inclusive).
pub fn range_from(field: &str, from: &str) -> Value {
    json!({
        "range": {
            field: { "gte": from }
        }
    })
}

/// Match documents by id.
pub fn ids(ids: &[String]) -> Value {
    json!({ "ids": { "values": ids } })
}

/// Wrap a query clause in a search body.
pub fn query(clause: Value) -> Value {
    json!({ "query": clause })
}

/// Wrap a query clause in a search body that also requests document versions.
///
/// Used for snapshots, where each hit must carry the version it was read at.
pub fn query_with_version(clause: Value) -> Value {
    json!({ "query": clause, "version": true })
}
