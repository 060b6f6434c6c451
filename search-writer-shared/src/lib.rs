//! # Search Writer Shared
//!
//! Plain data types shared by the repository and pipeline crates: documents,
//! write operations, per-item outcomes, search hits and index descriptors.

pub mod document;
pub mod hit;
pub mod index;
pub mod operation;
pub mod outcome;

pub use document::{now_timestamp, strip_reserved_fields, Document, VersionedDocument};
pub use hit::SearchHit;
pub use index::{IndexDescriptor, DEFAULT_MODIFIED_FIELD, DEFAULT_SAFETY_SKEW};
pub use operation::{transform, Operation, OperationKind, Transform};
pub use outcome::{Outcome, StatusSummary};
