//! Error types for the search writer repository.

mod search_error;

pub use search_error::SearchError;
