//! The concurrent index handle.
//!
//! `Biscuit` wraps the current `Index` structure behind an
//! `RwLock<Arc<..>>` so queries run against a stable snapshot while a
//! rebuild prepares its replacement off to the side. The swap is a
//! pointer exchange; in-flight queries keep their snapshot alive until
//! they finish.

use crate::error::Result;
use crate::host::{CancelToken, Heap};
use crate::index::builder::{self, Index};
use crate::index::persist;
use crate::index::types::{IndexStats, RowId, WindowConfig};
use crate::query::executor::QueryExecutor;
use crate::query::planner::{ExecutionPlan, PlanCache, QueryPlanner};
use crate::query::predicate::Predicate;
use log::info;
use parking_lot::RwLock;
use std::sync::Arc;

pub struct Biscuit {
    current: RwLock<Arc<Index>>,
    plan_cache: PlanCache,
}

impl Biscuit {
    /// Create a handle over an empty index.
    pub fn create(config: WindowConfig) -> Result<Self> {
        Ok(Self::from_index(Index::empty(config)?))
    }

    /// Build a handle from a full relation scan.
    pub fn build(
        config: WindowConfig,
        heap: &dyn Heap,
        cancel: Option<&CancelToken>,
    ) -> Result<Self> {
        Ok(Self::from_index(builder::build(config, heap, cancel)?))
    }

    pub fn from_index(index: Index) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
            plan_cache: PlanCache::default(),
        }
    }

    /// The current structure. Holders see a frozen view of the postings
    /// version they grabbed; later swaps do not affect it.
    pub fn snapshot(&self) -> Arc<Index> {
        self.current.read().clone()
    }

    pub fn config(&self) -> WindowConfig {
        *self.snapshot().config()
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }

    pub fn insert_row(&self, row: RowId, values: &[Option<&str>]) -> Result<()> {
        self.snapshot().insert_row(row, values)
    }

    pub fn update_row(
        &self,
        row: RowId,
        old: &[Option<&str>],
        new: &[Option<&str>],
    ) -> Result<()> {
        self.snapshot().update_row(row, old, new)
    }

    pub fn delete_row(&self, row: RowId) {
        self.snapshot().delete_row(row)
    }

    pub fn vacuum(&self) {
        self.snapshot().vacuum()
    }

    /// Rebuild the index from scratch and swap it in atomically. Queries
    /// started before the swap finish against the old structure; the new
    /// structure's version strictly exceeds anything the old one issued,
    /// so no stale cached plan survives the swap.
    pub fn rebuild(&self, heap: &dyn Heap, cancel: Option<&CancelToken>) -> Result<()> {
        let config = self.config();
        let fresh = builder::build(config, heap, cancel)?;

        let mut current = self.current.write();
        let next_version = current
            .meta()
            .structure_version
            .max(fresh.meta().structure_version)
            + 1;
        fresh.set_structure_version(next_version);
        info!(
            "rebuild complete: {} rows, structure version {next_version}",
            fresh.stats().row_count
        );
        *current = Arc::new(fresh);
        Ok(())
    }

    /// Plan a predicate against the current snapshot, consulting the
    /// shared plan cache.
    pub fn plan(&self, predicate: &Predicate) -> Result<ExecutionPlan> {
        let snapshot = self.snapshot();
        QueryPlanner::with_cache(&snapshot, &self.plan_cache).plan(predicate)
    }

    pub fn estimate_selectivity(&self, predicate: &Predicate) -> Result<f64> {
        Ok(self.plan(predicate)?.selectivity())
    }

    /// Plan and execute a predicate in one call, returning matching row
    /// ids in ascending order.
    pub fn search(
        &self,
        predicate: &Predicate,
        heap: &dyn Heap,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<RowId>> {
        let snapshot = self.snapshot();
        let plan = QueryPlanner::with_cache(&snapshot, &self.plan_cache).plan(predicate)?;
        let mut executor = QueryExecutor::new(&snapshot, heap);
        if let Some(token) = cancel {
            executor = executor.with_cancel_token(token);
        }
        Ok(executor.execute(&plan)?.iter().collect())
    }

    /// Serialize the current snapshot to its byte image.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        persist::serialize(&self.snapshot())
    }

    /// Restore a handle from a byte image.
    pub fn from_bytes(image: &[u8]) -> Result<Self> {
        Ok(Self::from_index(persist::deserialize(image)?))
    }
}
