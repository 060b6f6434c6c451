//! Bulk request wire format.
//!
//! Each operation becomes one action/metadata line, followed by a document
//! line for index and update operations. Every line, including the last, ends
//! with `\n`.

use serde_json::{Map, Value};

use search_writer_repository::SearchError;
use search_writer_shared::{Document, Operation, OperationKind};

/// An ordered set of operations captured from the buffer, with its rendered body.
///
/// `ops[i]` produced the `i`-th item of the bulk response.
#[derive(Debug, Clone)]
pub struct Batch {
    pub body: String,
    pub ops: Vec<Operation>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// One decoded entry of a bulk body.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    /// `index` or `delete`.
    pub action: String,
    pub metadata: Map<String, Value>,
    pub document: Option<Document>,
}

/// Render operations targeting `index` into a batch.
pub fn render_batch(index: &str, ops: Vec<Operation>) -> Result<Batch, SearchError> {
    let mut body = String::new();
    for op in &ops {
        render_operation(index, op, &mut body)?;
    }
    Ok(Batch { body, ops })
}

/// Append one operation to a bulk body.
pub fn render_operation(index: &str, op: &Operation, out: &mut String) -> Result<(), SearchError> {
    let mut metadata = Map::new();
    metadata.insert("_index".to_string(), Value::from(index));
    if let Some(doc_type) = &op.doc_type {
        metadata.insert("_type".to_string(), Value::from(doc_type.as_str()));
    }
    if let Some(id) = &op.id {
        metadata.insert("_id".to_string(), Value::from(id.as_str()));
    }
    if let Some(routing) = &op.routing {
        metadata.insert("routing".to_string(), Value::from(routing.as_str()));
    }
    if let Some(version) = op.version {
        metadata.insert("version".to_string(), Value::from(version));
    }

    let mut action = Map::new();
    action.insert(op.kind.action().to_string(), Value::Object(metadata));
    out.push_str(&serde_json::to_string(&action)?);
    out.push('\n');

    if op.kind == OperationKind::Delete {
        return Ok(());
    }
    let payload = op.payload.as_ref().ok_or_else(|| {
        SearchError::validation(format!("{:?} operation without a document", op.kind))
    })?;
    out.push_str(&serde_json::to_string(payload)?);
    out.push('\n');
    Ok(())
}

/// Parse a bulk body back into entries.
pub fn decode(body: &str) -> Result<Vec<BulkEntry>, SearchError> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());
    let mut entries = Vec::new();

    while let Some(line) = lines.next() {
        let header: Map<String, Value> = serde_json::from_str(line)?;
        let (action, metadata) = header
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::parse("empty bulk action line"))?;
        let metadata = match metadata {
            Value::Object(metadata) => metadata,
            other => {
                return Err(SearchError::parse(format!(
                    "bulk metadata for '{}' is not an object: {}",
                    action, other
                )))
            }
        };

        let document = if action == "delete" {
            None
        } else {
            let line = lines
                .next()
                .ok_or_else(|| SearchError::parse(format!("'{}' action without document", action)))?;
            Some(serde_json::from_str(line)?)
        };

        entries.push(BulkEntry {
            action,
            metadata,
            document,
        });
    }
    Ok(entries)
}
