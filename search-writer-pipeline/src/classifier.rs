//! Bulk response item classification.
//!
//! Every item of a bulk response is turned into an [`Outcome`]. Version
//! conflicts carry the version the rejected write provided, recovered from the
//! engine's error message; a conflict whose message cannot be parsed is a hard
//! error, as is any item whose shape is not understood.

use regex::Regex;
use serde_json::{json, Value};
use tracing::error;

use search_writer_shared::Outcome;

/// Error type the engine reports for optimistic-concurrency rejections.
pub const VERSION_CONFLICT_TYPE: &str = "version_conflict_engine_exception";

/// Code used for items that could not be interpreted.
pub const MALFORMED_ITEM: &str = "malformed_item";

/// Matches both `current [2], provided [1]` and
/// `current version [2] is different than the one provided [1]`.
pub const DEFAULT_CONFLICT_PATTERN: &str =
    r"current (?:version )?\[(\d+)\](?:,| is different than the one) provided \[(\d+)\]";

/// Classifies bulk response items.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    conflict_pattern: Regex,
}

impl ResponseClassifier {
    /// Create a classifier for the default engine message format.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_pattern(DEFAULT_CONFLICT_PATTERN)
    }

    /// Create a classifier with a custom conflict pattern.
    ///
    /// The pattern must capture the current version first and the provided
    /// version second.
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            conflict_pattern: Regex::new(pattern)?,
        })
    }

    /// Classify one item of a bulk response.
    ///
    /// # Arguments
    ///
    /// * `action` - The action the item answers (`index`, `create`, `delete`)
    /// * `item` - The raw item, e.g. `{"index": {"_id": "1", "status": 201}}`
    pub fn classify(&self, action: &str, item: &Value) -> Outcome {
        let Some(result) = item_result(action, item) else {
            return malformed(item, "no result object for action");
        };

        let Some(err) = result.get("error") else {
            return Outcome::Ok;
        };

        let (error_type, reason) = match err {
            Value::Object(obj) => (
                obj.get("type").and_then(Value::as_str).unwrap_or_default(),
                obj.get("reason").and_then(Value::as_str).unwrap_or_default(),
            ),
            // Old engines report errors as a bare string.
            Value::String(msg) if msg.starts_with("VersionConflictEngineException") => {
                (VERSION_CONFLICT_TYPE, msg.as_str())
            }
            Value::String(msg) => (msg.as_str(), msg.as_str()),
            _ => return malformed(item, "error is neither an object nor a string"),
        };

        if error_type != VERSION_CONFLICT_TYPE {
            let code = if error_type.is_empty() {
                "unknown_error"
            } else {
                error_type
            };
            return Outcome::error(code, result.clone());
        }

        let Some(id) = result.get("_id").and_then(Value::as_str) else {
            return malformed(item, "version conflict without _id");
        };

        match self.provided_version(reason) {
            Some(provided_version) => Outcome::Conflict {
                id: id.to_string(),
                provided_version,
            },
            None => malformed(item, "unparsable version conflict message"),
        }
    }

    /// Extract the provided version from a conflict message.
    pub fn provided_version(&self, message: &str) -> Option<u64> {
        let captures = self.conflict_pattern.captures(message)?;
        captures.get(2)?.as_str().parse().ok()
    }
}

fn item_result<'a>(action: &str, item: &'a Value) -> Option<&'a Value> {
    let obj = item.as_object()?;
    let result = match obj.get(action) {
        Some(result) => result,
        None if obj.len() == 1 => obj.values().next()?,
        None => return None,
    };
    result.is_object().then_some(result)
}

fn malformed(item: &Value, reason: &str) -> Outcome {
    error!(item = %item, reason = %reason, "Malformed bulk response item");
    Outcome::error(MALFORMED_ITEM, json!({ "reason": reason, "item": item }))
}
