use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// Unique identifier for a row in the host relation
pub type RowId = u32;

/// Zero-based identifier for an indexed column
pub type ColumnId = u16;

/// An indexable unit: a bounded byte substring extracted by the tokenizer.
/// Owned form used as the postings dictionary key.
pub type Unit = Vec<u8>;

/// Magic number at the head of a persisted index image ("BISC")
pub const BISCUIT_MAGIC: u32 = 0x4249_5343;

/// On-disk format version; bumped on incompatible layout changes
pub const FORMAT_VERSION: u32 = 1;

/// Tombstoned rows are physically purged once this many accumulate
pub const TOMBSTONE_CLEANUP_THRESHOLD: u64 = 1000;

/// A single unit occurrence: which row, which column, at what byte offset
/// in the column value. Ordered by (row, column, offset) so posting lists
/// merge without re-sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posting {
    pub row: RowId,
    pub column: ColumnId,
    pub offset: u32,
}

/// All occurrences of one unit, kept sorted by (row, column, offset).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    postings: Vec<Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert: re-adding an identical posting is a no-op.
    pub fn insert(&mut self, posting: Posting) {
        match self.postings.binary_search(&posting) {
            Ok(_) => {}
            Err(pos) => self.postings.insert(pos, posting),
        }
    }

    /// Remove every posting for the given row/column pair.
    pub fn remove_row_column(&mut self, row: RowId, column: ColumnId) {
        self.postings
            .retain(|p| !(p.row == row && p.column == column));
    }

    /// Remove every posting for the given row across all columns.
    pub fn remove_row(&mut self, row: RowId) {
        self.postings.retain(|p| p.row != row);
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Posting> {
        self.postings.iter()
    }

    pub fn as_slice(&self) -> &[Posting] {
        &self.postings
    }

    /// Bulk load from postings already sorted by (row, column, offset).
    /// Duplicates are collapsed.
    pub fn from_sorted(mut postings: Vec<Posting>) -> Self {
        postings.dedup();
        debug_assert!(postings.is_sorted());
        Self { postings }
    }
}

/// Index creation parameters. Extraction is a pure function of the column
/// value and these parameters, so they are fixed for the life of the
/// structure and persisted with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window length in bytes (units are at most this long)
    pub window_len: u32,
    /// Distance between consecutive window starts; 1 ≤ stride ≤ window_len
    pub stride: u32,
    /// Number of indexed columns
    pub columns: u16,
    /// Case-fold values and patterns before matching
    pub case_insensitive: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_len: 3,
            stride: 1,
            columns: 1,
            case_insensitive: false,
        }
    }
}

impl WindowConfig {
    /// Reject invalid parameters before any build work happens.
    pub fn validate(&self) -> Result<()> {
        if self.window_len == 0 {
            return Err(IndexError::config("window_len must be at least 1"));
        }
        if self.stride == 0 || self.stride > self.window_len {
            return Err(IndexError::config(format!(
                "stride must satisfy 1 <= stride <= window_len (got stride {}, window_len {})",
                self.stride, self.window_len
            )));
        }
        if self.columns == 0 {
            return Err(IndexError::config("at least one column must be indexed"));
        }
        Ok(())
    }
}

/// Per-structure metadata, read at build and query time, mutated only by
/// builder operations under exclusive access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub config: WindowConfig,
    /// Monotonically increasing; bumped on every structural mutation
    pub structure_version: u64,
}

impl IndexMeta {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            config,
            structure_version: 0,
        }
    }
}

/// Snapshot of index size and maintenance counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub row_count: u64,
    pub unit_count: u64,
    pub posting_count: u64,
    pub tombstone_count: u64,
    pub insert_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub structure_version: u64,
    /// Rough in-memory footprint of the postings structure
    pub approx_bytes: u64,
}
