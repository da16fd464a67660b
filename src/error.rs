use crate::index::types::{ColumnId, RowId};
use thiserror::Error;

/// Errors surfaced to the host database.
///
/// Query-time predicate oddities (empty pattern, NULL column values) are
/// not errors: they have defined fallback semantics in the executor.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Invalid index parameters, rejected at creation time before any
    /// build work happens.
    #[error("invalid index configuration: {reason}")]
    Config { reason: String },

    /// A persisted structure failed its magic, version, or checksum
    /// check. The index is unusable until rebuilt.
    #[error("corrupt index image: {reason}")]
    Corruption { reason: String },

    /// Build or maintenance ran out of memory or quota. The structure is
    /// unchanged; the operation can be retried, possibly in smaller
    /// batches. Never raised by the bundled in-memory structures, which
    /// delegate allocation to the global allocator; it is the variant a
    /// host maps its own quota-layer failures onto.
    #[error("resource exhausted during {operation}: {reason}")]
    ResourceExhausted { operation: String, reason: String },

    /// Host-requested abort, honored at the next checkpoint. A cancelled
    /// bulk build reports how many rows are fully indexed so a retry can
    /// resume after them; cancelled queries commit nothing and report
    /// `None`.
    #[error("operation cancelled{}", .rows_committed.map(|n| format!(" after {n} committed rows")).unwrap_or_default())]
    Cancelled { rows_committed: Option<u64> },

    /// The host failed to supply a column value the index needed, with
    /// enough context to log and decide on a retry or REINDEX.
    #[error("host read failed for row {row}, column {column}: {reason}")]
    Host {
        row: RowId,
        column: ColumnId,
        reason: String,
    },
}

impl IndexError {
    pub fn config(reason: impl Into<String>) -> Self {
        IndexError::Config {
            reason: reason.into(),
        }
    }

    pub fn corruption(reason: impl Into<String>) -> Self {
        IndexError::Corruption {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
