//! Index construction and incremental maintenance.
//!
//! The correctness bar for every operation here is build-equivalence:
//! after any sequence of inserts, updates, and deletes, query results must
//! match what a from-scratch rebuild of the surviving rows would produce.
//! Mutations stage their postings first and only then apply them, so a
//! failed operation never leaves a partially updated posting list.

use crate::error::{IndexError, Result};
use crate::host::{CancelToken, Heap};
use crate::index::store::PostingsStore;
use crate::index::tokenizer::tokenize;
use crate::index::types::{
    ColumnId, IndexMeta, IndexStats, Posting, PostingList, RowId, Unit, WindowConfig,
    TOMBSTONE_CLEANUP_THRESHOLD,
};
use log::debug;
use parking_lot::RwLock;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rows per commit batch during bulk builds. Each batch is tokenized in
/// parallel and committed as a unit; cancellation is honored between
/// batches so a build can resume from the last committed row.
const BUILD_BATCH_ROWS: usize = 1024;

/// One version of the index structure. Readers work against an
/// `Arc<Index>` snapshot; builder operations lock only the posting-list
/// shards and bitmaps they touch.
#[derive(Debug)]
pub struct Index {
    config: WindowConfig,
    store: PostingsStore,
    /// Rows that have ever been inserted and not yet vacuumed away
    rows: RwLock<RoaringBitmap>,
    /// Rows with a non-NULL value, per column (NULLs are unindexed)
    column_rows: Vec<RwLock<RoaringBitmap>>,
    /// Deleted rows awaiting physical purge
    tombstones: RwLock<RoaringBitmap>,
    structure_version: AtomicU64,
    insert_count: AtomicU64,
    update_count: AtomicU64,
    delete_count: AtomicU64,
}

impl Index {
    /// Create an empty index. Invalid parameters are rejected here,
    /// before any build work.
    pub fn empty(config: WindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: PostingsStore::new(),
            rows: RwLock::new(RoaringBitmap::new()),
            column_rows: (0..config.columns)
                .map(|_| RwLock::new(RoaringBitmap::new()))
                .collect(),
            tombstones: RwLock::new(RoaringBitmap::new()),
            structure_version: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn meta(&self) -> IndexMeta {
        IndexMeta {
            format_version: crate::index::types::FORMAT_VERSION,
            config: self.config,
            structure_version: self.structure_version.load(Ordering::Acquire),
        }
    }

    pub(crate) fn store(&self) -> &PostingsStore {
        &self.store
    }

    /// Rows eligible to match in a column: non-NULL and not tombstoned.
    pub fn live_column_rows(&self, column: ColumnId) -> RoaringBitmap {
        let rows = self.column_rows[column as usize].read().clone();
        rows - &*self.tombstones.read()
    }

    pub fn is_tombstoned(&self, row: RowId) -> bool {
        self.tombstones.read().contains(row)
    }

    /// Index one row's column values. Staging happens before any shard is
    /// touched, so the operation is all-or-nothing; retry is idempotent
    /// because posting insertion is.
    pub fn insert_row(&self, row: RowId, values: &[Option<&str>]) -> Result<()> {
        let staged = self.stage_row(row, values)?;
        self.apply_insert(row, &staged);
        self.insert_count.fetch_add(1, Ordering::Relaxed);
        self.bump_version();
        Ok(())
    }

    /// Replace a row's values. Equivalent to deleting the old row and
    /// inserting a fresh one under the same row id; `old` must be the
    /// values the row was indexed with (the host owns the previous tuple).
    pub fn update_row(
        &self,
        row: RowId,
        old: &[Option<&str>],
        new: &[Option<&str>],
    ) -> Result<()> {
        let old_units = self.stage_row(row, old)?;
        let staged = self.stage_row(row, new)?;

        for (column, units) in &old_units {
            let unit_keys: Vec<Unit> = units.iter().map(|(u, _)| u.clone()).collect();
            self.store.remove_row_column(&unit_keys, row, *column);
            if !staged.iter().any(|(c, _)| c == column) {
                self.column_rows[*column as usize].write().remove(row);
            }
        }

        self.apply_insert(row, &staged);
        self.update_count.fetch_add(1, Ordering::Relaxed);
        self.bump_version();
        Ok(())
    }

    /// Tombstone a row: it stops matching immediately, and its postings
    /// are physically purged on the next vacuum. Purge runs automatically
    /// once enough tombstones accumulate.
    pub fn delete_row(&self, row: RowId) {
        let pending = {
            let mut tombs = self.tombstones.write();
            tombs.insert(row);
            tombs.len()
        };
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        self.bump_version();

        if pending >= TOMBSTONE_CLEANUP_THRESHOLD {
            debug!("tombstone threshold reached ({pending} rows), purging");
            self.vacuum();
        }
    }

    /// Physically remove all postings of tombstoned rows and prune empty
    /// posting lists.
    pub fn vacuum(&self) {
        let dead = std::mem::take(&mut *self.tombstones.write());
        if dead.is_empty() {
            return;
        }
        debug!("vacuum purging {} rows", dead.len());
        self.store.purge_rows(&dead);
        *self.rows.write() -= &dead;
        for column in &self.column_rows {
            *column.write() -= &dead;
        }
        self.bump_version();
    }

    pub fn stats(&self) -> IndexStats {
        let rows = self.rows.read().clone();
        let tombstones = self.tombstones.read().clone();
        // Bitmap difference, not count arithmetic: a redundant delete can
        // tombstone a row id that vacuum already purged from `rows`.
        IndexStats {
            row_count: (rows - &tombstones).len(),
            unit_count: self.store.unit_count() as u64,
            posting_count: self.store.total_postings() as u64,
            tombstone_count: tombstones.len(),
            insert_count: self.insert_count.load(Ordering::Relaxed),
            update_count: self.update_count.load(Ordering::Relaxed),
            delete_count: self.delete_count.load(Ordering::Relaxed),
            structure_version: self.structure_version.load(Ordering::Acquire),
            approx_bytes: self.store.approx_bytes(),
        }
    }

    fn bump_version(&self) {
        self.structure_version.fetch_add(1, Ordering::AcqRel);
    }

    /// Stamp a version onto a freshly built index, so a rebuilt structure
    /// never reuses a version already handed out by its predecessor.
    pub(crate) fn set_structure_version(&self, version: u64) {
        self.structure_version.store(version, Ordering::Release);
    }

    /// Tokenize every non-NULL column of a row. Pure staging: no index
    /// state is touched.
    fn stage_row(
        &self,
        _row: RowId,
        values: &[Option<&str>],
    ) -> Result<Vec<(ColumnId, Vec<(Unit, u32)>)>> {
        if values.len() != self.config.columns as usize {
            return Err(IndexError::config(format!(
                "expected {} column values, got {}",
                self.config.columns,
                values.len()
            )));
        }
        Ok(values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                v.map(|value| (i as ColumnId, tokenize(value.as_bytes(), &self.config)))
            })
            .collect())
    }

    fn apply_insert(&self, row: RowId, staged: &[(ColumnId, Vec<(Unit, u32)>)]) {
        for (column, units) in staged {
            for (unit, offset) in units {
                self.store.insert(
                    unit,
                    Posting {
                        row,
                        column: *column,
                        offset: *offset,
                    },
                );
            }
            self.column_rows[*column as usize].write().insert(row);
        }
        self.rows.write().insert(row);
        // A re-inserted row id sheds any pending tombstone.
        self.tombstones.write().remove(row);
    }

    /// Restore an index from persisted parts (see `persist`).
    pub(crate) fn from_parts(
        config: WindowConfig,
        store: PostingsStore,
        rows: RoaringBitmap,
        column_rows: Vec<RoaringBitmap>,
        tombstones: RoaringBitmap,
        structure_version: u64,
    ) -> Self {
        Self {
            config,
            store,
            rows: RwLock::new(rows),
            column_rows: column_rows.into_iter().map(RwLock::new).collect(),
            tombstones: RwLock::new(tombstones),
            structure_version: AtomicU64::new(structure_version),
            insert_count: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn parts(
        &self,
    ) -> (
        Vec<(Unit, PostingList)>,
        RoaringBitmap,
        Vec<RoaringBitmap>,
        RoaringBitmap,
        u64,
    ) {
        (
            self.store.sorted_entries(),
            self.rows.read().clone(),
            self.column_rows.iter().map(|c| c.read().clone()).collect(),
            self.tombstones.read().clone(),
            self.structure_version.load(Ordering::Acquire),
        )
    }
}

/// Batch builder over a full relation scan. Interruptible: on
/// cancellation the committed prefix is kept and `run` can be called
/// again to continue from the last fully committed row.
pub struct BulkBuilder {
    index: Index,
    rows_committed: u64,
    resume_after: Option<RowId>,
}

impl BulkBuilder {
    pub fn new(config: WindowConfig) -> Result<Self> {
        Ok(Self {
            index: Index::empty(config)?,
            rows_committed: 0,
            resume_after: None,
        })
    }

    pub fn rows_committed(&self) -> u64 {
        self.rows_committed
    }

    /// Scan the heap and index every row. Rows up to and including the
    /// last committed one are skipped, making the call resumable after a
    /// cancellation.
    pub fn run(&mut self, heap: &dyn Heap, cancel: Option<&CancelToken>) -> Result<()> {
        let mut batch: Vec<(RowId, Vec<Option<String>>)> = Vec::with_capacity(BUILD_BATCH_ROWS);
        let mut cancelled = false;

        let resume_after = self.resume_after;
        heap.for_each_row(&mut |row, values| {
            if let Some(last) = resume_after {
                if row <= last {
                    return Ok(true);
                }
            }
            batch.push((row, values.iter().map(|v| v.map(str::to_owned)).collect()));
            if batch.len() >= BUILD_BATCH_ROWS {
                self.commit_batch(&mut batch)?;
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    cancelled = true;
                    return Ok(false);
                }
            }
            Ok(true)
        })?;

        if cancelled {
            return Err(IndexError::Cancelled {
                rows_committed: Some(self.rows_committed),
            });
        }
        self.commit_batch(&mut batch)?;
        Ok(())
    }

    pub fn finish(self) -> Index {
        self.index
    }

    fn commit_batch(&mut self, batch: &mut Vec<(RowId, Vec<Option<String>>)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Tokenize in parallel, then commit serially in row order.
        let staged: Vec<(RowId, Vec<(ColumnId, Vec<(Unit, u32)>)>)> = batch
            .par_iter()
            .map(|(row, values)| {
                let borrowed: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
                self.index.stage_row(*row, &borrowed).map(|s| (*row, s))
            })
            .collect::<Result<Vec<_>>>()?;

        for (row, units) in &staged {
            self.index.apply_insert(*row, units);
            self.rows_committed += 1;
            self.resume_after = Some(*row);
        }
        debug!(
            "committed batch of {} rows ({} total)",
            staged.len(),
            self.rows_committed
        );
        batch.clear();
        Ok(())
    }
}

/// Build an index from a full relation scan in one call.
pub fn build(
    config: WindowConfig,
    heap: &dyn Heap,
    cancel: Option<&CancelToken>,
) -> Result<Index> {
    let mut builder = BulkBuilder::new(config)?;
    builder.run(heap, cancel)?;
    Ok(builder.finish())
}
