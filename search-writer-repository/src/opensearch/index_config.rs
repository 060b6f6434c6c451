//! Index settings and mapping resources.
//!
//! Mappings live in JSON files next to the deployment; each index version
//! points at one of them.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::SearchError;

/// Read a mapping resource and apply the replica override.
///
/// # Arguments
///
/// * `path` - JSON file containing `settings` and `mappings`
/// * `replicas` - replica count used when the mapping does not set one
pub async fn load_mapping(path: &Path, replicas: Option<u32>) -> Result<Value, SearchError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        SearchError::validation(format!("error reading mapping {}: {}", path.display(), e))
    })?;
    let mut mapping: Value = serde_json::from_str(&raw).map_err(|e| {
        SearchError::validation(format!("error parsing mapping {}: {}", path.display(), e))
    })?;

    if let Some(replicas) = replicas {
        apply_replica_override(&mut mapping, replicas)?;
    }

    debug!(path = %path.display(), "Loaded mapping resource");
    Ok(mapping)
}

/// Set `settings.index.number_of_replicas` unless the mapping already configures replicas.
pub fn apply_replica_override(mapping: &mut Value, replicas: u32) -> Result<(), SearchError> {
    let root = mapping
        .as_object_mut()
        .ok_or_else(|| SearchError::validation("mapping must be a JSON object"))?;

    let settings = object_entry(root, "settings")?;
    if settings.contains_key("number_of_replicas") {
        return Ok(());
    }
    let index_settings = object_entry(settings, "index")?;
    if !index_settings.contains_key("number_of_replicas") {
        index_settings.insert("number_of_replicas".to_string(), Value::from(replicas));
    }
    Ok(())
}

fn object_entry<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
) -> Result<&'a mut Map<String, Value>, SearchError> {
    parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| SearchError::validation(format!("mapping field '{}' must be an object", key)))
}
