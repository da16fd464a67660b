//! The boundary between the index core and its host database.
//!
//! The core never owns row storage, visibility rules, or transaction
//! state. It consumes them through [`Heap`], which a host implements over
//! its own storage layer. [`MemoryHeap`] is a reference implementation
//! used by the CLI and the test suite.

use crate::error::{IndexError, Result};
use crate::index::types::{ColumnId, RowId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Host-side storage the index reads from.
///
/// `read_column` is the authoritative source for boundary verification:
/// the executor re-reads values from the host instead of caching them in
/// the index structure.
pub trait Heap {
    /// Iterate every row of the relation in row-id order. Used by full
    /// builds. The callback returns `false` to stop early.
    fn for_each_row(
        &self,
        f: &mut dyn FnMut(RowId, &[Option<&str>]) -> Result<bool>,
    ) -> Result<()>;

    /// Fetch one column value. `None` means SQL NULL.
    fn read_column(&self, row: RowId, column: ColumnId) -> Result<Option<String>>;

    /// Transaction/visibility filter supplied by the host. The executor
    /// applies this before returning results, so the core carries no
    /// visibility logic of its own.
    fn is_visible(&self, row: RowId) -> bool;
}

/// Cooperative cancellation handle for long builds and queries.
///
/// The executor checks it at every posting-list fetch boundary; the bulk
/// builder checks it between row batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Simple in-memory heap: a dense table of rows with optional (nullable)
/// text columns. Row ids are assigned sequentially from 0.
#[derive(Debug, Default, Clone)]
pub struct MemoryHeap {
    rows: Vec<Vec<Option<String>>>,
    deleted: Vec<bool>,
}

impl MemoryHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row and return its id.
    pub fn push_row(&mut self, columns: Vec<Option<String>>) -> RowId {
        let id = self.rows.len() as RowId;
        self.rows.push(columns);
        self.deleted.push(false);
        id
    }

    /// Replace a row's columns in place, returning the previous values.
    pub fn update_row(&mut self, row: RowId, columns: Vec<Option<String>>) -> Vec<Option<String>> {
        std::mem::replace(&mut self.rows[row as usize], columns)
    }

    /// Mark a row invisible (the host's notion of deletion).
    pub fn delete_row(&mut self, row: RowId) {
        if let Some(flag) = self.deleted.get_mut(row as usize) {
            *flag = true;
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl Heap for MemoryHeap {
    fn for_each_row(
        &self,
        f: &mut dyn FnMut(RowId, &[Option<&str>]) -> Result<bool>,
    ) -> Result<()> {
        for (i, row) in self.rows.iter().enumerate() {
            if self.deleted[i] {
                continue;
            }
            let borrowed: Vec<Option<&str>> = row.iter().map(|c| c.as_deref()).collect();
            if !f(i as RowId, &borrowed)? {
                break;
            }
        }
        Ok(())
    }

    fn read_column(&self, row: RowId, column: ColumnId) -> Result<Option<String>> {
        let cols = self.rows.get(row as usize).ok_or_else(|| IndexError::Host {
            row,
            column,
            reason: "row not found".to_string(),
        })?;
        let value = cols.get(column as usize).ok_or_else(|| IndexError::Host {
            row,
            column,
            reason: "column out of range".to_string(),
        })?;
        Ok(value.clone())
    }

    fn is_visible(&self, row: RowId) -> bool {
        self.deleted.get(row as usize).map(|d| !d).unwrap_or(false)
    }
}
