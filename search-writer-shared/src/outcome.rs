//! Per-item bulk outcomes and aggregate status.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The classified result of one bulk response item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The engine applied the write.
    Ok,
    /// The engine rejected the write because the expected version did not match.
    Conflict {
        id: String,
        /// The (conflicting) version the write provided, as reported by the engine.
        provided_version: u64,
    },
    /// Any other failure, including items whose shape could not be parsed.
    Error { code: String, details: Value },
}

impl Outcome {
    pub fn error(code: impl Into<String>, details: Value) -> Self {
        Self::Error {
            code: code.into(),
            details,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

/// Summary returned by a status handler, typically after the writer is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Items the engine accepted.
    pub ok: u64,
    /// Items that failed with a hard error.
    pub errors: u64,
    /// Items rejected with a version conflict.
    pub conflicts: u64,
    /// Whole-request failures (transport errors, shutdown timeouts).
    pub failures: u64,
}

impl StatusSummary {
    /// Total number of items reported.
    pub fn total(&self) -> u64 {
        self.ok + self.errors + self.conflicts
    }

    /// True when nothing went wrong at either the item or the request level.
    pub fn is_success(&self) -> bool {
        self.errors == 0 && self.conflicts == 0 && self.failures == 0
    }
}
