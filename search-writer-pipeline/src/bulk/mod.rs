//! Bulk writing: buffering, wire encoding and batch dispatch.

mod buffer;
pub mod codec;
mod executor;

pub use buffer::{BulkWriteBuffer, BulkWriterConfig};
pub use codec::{Batch, BulkEntry};
pub use executor::{FlushExecutor, MISSING_ITEM};
