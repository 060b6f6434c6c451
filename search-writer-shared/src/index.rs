//! Versioned index descriptors used by migrations.

use std::path::PathBuf;
use std::time::Duration;

/// Default margin subtracted from the migration start time when selecting
/// documents for the catch-up pass.
pub const DEFAULT_SAFETY_SKEW: Duration = Duration::from_secs(5);

/// Default name of the field holding a document's last-modified timestamp.
pub const DEFAULT_MODIFIED_FIELD: &str = "updated_at";

/// Describes one generation of an aliased index.
///
/// The physical index is named `{alias}_v{version}`; readers and writers only
/// ever address the alias.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    /// Logical alias name.
    pub alias: String,
    /// Target schema version.
    pub version: u32,
    /// Path of the JSON file holding settings and mappings for this version.
    pub mapping_resource: PathBuf,
    /// Replica count applied when the mapping does not set one.
    pub replicas: Option<u32>,
    /// Safety margin for the catch-up pass; widen it on clusters with slow refresh.
    pub safety_skew: Duration,
    /// Timestamp field used to select documents modified during the migration.
    pub modified_field: String,
}

impl IndexDescriptor {
    pub fn new(alias: impl Into<String>, version: u32, mapping_resource: impl Into<PathBuf>) -> Self {
        Self {
            alias: alias.into(),
            version,
            mapping_resource: mapping_resource.into(),
            replicas: None,
            safety_skew: DEFAULT_SAFETY_SKEW,
            modified_field: DEFAULT_MODIFIED_FIELD.to_string(),
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn with_safety_skew(mut self, skew: Duration) -> Self {
        self.safety_skew = skew;
        self
    }

    pub fn with_modified_field(mut self, field: impl Into<String>) -> Self {
        self.modified_field = field.into();
        self
    }

    /// Physical index name for this version.
    pub fn index_name(&self) -> String {
        format!("{}_v{}", self.alias, self.version)
    }
}
