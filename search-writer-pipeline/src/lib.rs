//! # Search Writer Pipeline
//!
//! The write path in front of the search engine.
//!
//! ## Architecture
//!
//! 1. **BulkWriteBuffer**: batches single operations into bulk requests
//! 2. **FlushExecutor**: sends batches inline or through a bounded worker pool
//! 3. **ResponseClassifier**: turns every bulk response item into an outcome
//! 4. **StatusHandler**: receives per-item and per-flush callbacks
//! 5. **OptimisticUpdater**: versioned read-modify-write with bounded retry
//! 6. **ScrollCursor**: lazy iteration over every hit of a query
//! 7. **IndexMigrator**: alias-based reindexing into a new index generation

pub mod backup;
pub mod bulk;
pub mod classifier;
pub mod crud;
pub mod errors;
pub mod migrator;
pub mod scroll;
pub mod status;
pub mod update;

pub use backup::{backup, restore};
pub use bulk::{BulkWriteBuffer, BulkWriterConfig, FlushExecutor};
pub use classifier::ResponseClassifier;
pub use crud::{delete_by_query, DocumentDao};
pub use errors::PipelineError;
pub use migrator::{IndexMigrator, MigrationConfig, MigrationOutcome};
pub use scroll::{ScrollConfig, ScrollCursor};
pub use status::{ConflictResolvingHandler, LoggingStatusHandler, StatusCounters, StatusHandler};
pub use update::{OptimisticUpdater, UpdateConfig};
