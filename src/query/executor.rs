//! Plan execution: postings intersection, offset consistency, and
//! boundary verification.
//!
//! The candidate sets produced here are exact by construction or made
//! exact by a deterministic re-read of the authoritative column value.
//! There is no probabilistic recheck: verification can only strip
//! candidates whose window alignment could not be proven, never a true
//! match.

use crate::error::{IndexError, Result};
use crate::host::{CancelToken, Heap};
use crate::index::builder::Index;
use crate::index::tokenizer::fold;
use crate::index::types::{ColumnId, RowId};
use crate::query::planner::{ContainsPlan, ExecutionPlan, Narrow, PlanNode, RequiredUnit};
use log::trace;
use memchr::memmem;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;

/// Cancellation is checked every this many verification fetches.
const CANCEL_CHECK_INTERVAL: usize = 256;

pub struct QueryExecutor<'a> {
    index: &'a Index,
    heap: &'a dyn Heap,
    cancel: Option<&'a CancelToken>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(index: &'a Index, heap: &'a dyn Heap) -> Self {
        Self {
            index,
            heap,
            cancel: None,
        }
    }

    pub fn with_cancel_token(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Execute a plan and return the matching rows, visibility-filtered
    /// and deduplicated. Bitmap iteration yields ascending row ids, which
    /// satisfies hosts that want sorted output for sequential heap access.
    pub fn execute(&self, plan: &ExecutionPlan) -> Result<RoaringBitmap> {
        let matched = self.execute_node(&plan.root)?;
        Ok(self.apply_visibility(matched))
    }

    fn execute_node(&self, node: &PlanNode) -> Result<RoaringBitmap> {
        match node {
            PlanNode::Leaf(leaf) => self.execute_contains(leaf),
            PlanNode::And(children) => {
                // Children arrive rarest-first from the planner; an empty
                // intermediate result short-circuits the whole AND.
                let mut acc: Option<RoaringBitmap> = None;
                for child in children {
                    let rows = self.execute_node(child)?;
                    let next = match acc {
                        Some(existing) => existing & rows,
                        None => rows,
                    };
                    if next.is_empty() {
                        return Ok(next);
                    }
                    acc = Some(next);
                }
                Ok(acc.unwrap_or_default())
            }
            PlanNode::Or(children) => {
                let mut acc = RoaringBitmap::new();
                for child in children {
                    acc |= self.execute_node(child)?;
                }
                Ok(acc)
            }
        }
    }

    fn execute_contains(&self, leaf: &ContainsPlan) -> Result<RoaringBitmap> {
        match &leaf.narrow {
            Narrow::MatchAll => Ok(self.index.live_column_rows(leaf.column)),
            Narrow::ColumnScan => self.column_scan(leaf),
            Narrow::DictScan => self.dict_scan(leaf),
            Narrow::Phases(phases) => self.phase_intersection(leaf, phases),
        }
    }

    /// Verify every live row of the column against the pattern. Last
    /// resort for patterns the unit dictionary cannot resolve.
    fn column_scan(&self, leaf: &ContainsPlan) -> Result<RoaringBitmap> {
        let rows = self.index.live_column_rows(leaf.column);
        let finder = memmem::Finder::new(&leaf.pattern);
        let mut matched = RoaringBitmap::new();
        for (i, row) in rows.iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                self.checkpoint()?;
            }
            if let Some(value) = self.heap.read_column(row, leaf.column)? {
                let folded = fold(value.as_bytes(), self.index.config());
                if finder.find(&folded).is_some() {
                    matched.insert(row);
                }
            }
        }
        Ok(matched)
    }

    /// Short-pattern path: every unit containing the pattern contributes
    /// its rows. Units are contiguous substrings of the value, so these
    /// candidates are structurally sound; the boundary confirmation
    /// re-reads the value at the derived offset.
    fn dict_scan(&self, leaf: &ContainsPlan) -> Result<RoaringBitmap> {
        self.checkpoint()?;
        let hits = self.index.store().scan_containing(&leaf.pattern);
        trace!(
            "dict scan for {} bytes matched {} units",
            leaf.pattern.len(),
            hits.len()
        );

        // row -> candidate match offsets in the value
        let mut anchors: FxHashMap<RowId, Vec<u32>> = FxHashMap::default();
        for (_, pos_in_unit, postings) in hits {
            for posting in postings.iter() {
                if posting.column != leaf.column {
                    continue;
                }
                anchors
                    .entry(posting.row)
                    .or_default()
                    .push(posting.offset + pos_in_unit);
            }
        }

        if leaf.verify {
            self.verify_anchors(leaf, anchors)
        } else {
            Ok(anchors.keys().copied().collect())
        }
    }

    /// Long-pattern path: merge-intersect the required units of each
    /// alignment phase, smallest posting list first, keeping only anchors
    /// where every unit sits at its pattern-relative offset.
    fn phase_intersection(
        &self,
        leaf: &ContainsPlan,
        phases: &[Vec<RequiredUnit>],
    ) -> Result<RoaringBitmap> {
        let mut matched = RoaringBitmap::new();
        for required in phases {
            let anchors = self.intersect_phase(leaf.column, required)?;
            if anchors.is_empty() {
                continue;
            }
            if leaf.verify {
                matched |= self.verify_anchors(leaf, anchors)?;
            } else {
                matched.extend(anchors.keys().copied());
            }
        }
        Ok(matched)
    }

    fn intersect_phase(
        &self,
        column: ColumnId,
        required: &[RequiredUnit],
    ) -> Result<FxHashMap<RowId, Vec<u32>>> {
        let mut anchors: FxHashMap<RowId, Vec<u32>> = FxHashMap::default();

        for (i, req) in required.iter().enumerate() {
            self.checkpoint()?;
            let postings = self.index.store().lookup(&req.unit);
            // Absent unit: empty list, not an error, and the whole
            // intersection collapses immediately.
            if postings.is_empty() {
                return Ok(FxHashMap::default());
            }

            if i == 0 {
                for posting in postings.iter() {
                    if posting.column != column || posting.offset < req.rel_offset {
                        continue;
                    }
                    anchors
                        .entry(posting.row)
                        .or_default()
                        .push(posting.offset - req.rel_offset);
                }
            } else {
                let mut present: FxHashMap<RowId, Vec<u32>> = FxHashMap::default();
                for posting in postings.iter() {
                    if posting.column != column || posting.offset < req.rel_offset {
                        continue;
                    }
                    present
                        .entry(posting.row)
                        .or_default()
                        .push(posting.offset - req.rel_offset);
                }
                anchors.retain(|row, offs| {
                    match present.get(row) {
                        Some(confirmed) => {
                            offs.retain(|o| confirmed.contains(o));
                            !offs.is_empty()
                        }
                        None => false,
                    }
                });
            }

            if anchors.is_empty() {
                return Ok(anchors);
            }
        }
        Ok(anchors)
    }

    /// Deterministic boundary confirmation: compare the pattern against
    /// the authoritative column value at each candidate offset. A true
    /// occurrence always survives this check.
    fn verify_anchors(
        &self,
        leaf: &ContainsPlan,
        anchors: FxHashMap<RowId, Vec<u32>>,
    ) -> Result<RoaringBitmap> {
        let mut matched = RoaringBitmap::new();
        for (i, (row, offsets)) in anchors.into_iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                self.checkpoint()?;
            }
            let Some(value) = self.heap.read_column(row, leaf.column)? else {
                continue;
            };
            let folded = fold(value.as_bytes(), self.index.config());
            let hit = offsets.iter().any(|&o| {
                let start = o as usize;
                let end = start + leaf.pattern.len();
                end <= folded.len() && &folded[start..end] == leaf.pattern.as_slice()
            });
            if hit {
                matched.insert(row);
            }
        }
        Ok(matched)
    }

    fn apply_visibility(&self, rows: RoaringBitmap) -> RoaringBitmap {
        rows.iter()
            .filter(|&row| !self.index.is_tombstoned(row) && self.heap.is_visible(row))
            .collect()
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_some_and(|c| c.is_cancelled()) {
            // Queries commit nothing, so there is no resume point.
            return Err(IndexError::Cancelled {
                rows_committed: None,
            });
        }
        Ok(())
    }
}
