//! Query planning: decompose substring predicates into postings lookups.
//!
//! A `CONTAINS` pattern at least as long as the window decomposes into
//! required units with fixed relative offsets; shorter patterns fall back
//! to a dictionary containment scan over the lexicographically ordered
//! unit store. Selectivity estimates order intersection operands smallest
//! first, which is the main cost lever at execution time.

use crate::error::{IndexError, Result};
use crate::index::builder::Index;
use crate::index::tokenizer::{fold, pattern_windows};
use crate::index::types::{ColumnId, Unit};
use crate::query::predicate::Predicate;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Upper bound on required units intersected per alignment phase. Plans
/// that truncate to this cap keep the verification step, so exactness is
/// unaffected.
const MAX_REQUIRED_UNITS: usize = 16;

/// Modeled per-row cost of a boundary verification (host column fetch
/// plus a byte comparison), relative to scanning one posting.
const VERIFY_COST_PER_ROW: f64 = 8.0;

/// A unit the pattern requires, at a fixed pattern-relative offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredUnit {
    pub unit: Unit,
    pub rel_offset: u32,
    /// Posting count at plan time, for smallest-first ordering
    pub postings: usize,
}

/// Candidate-narrowing strategy for one Contains leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Narrow {
    /// Empty pattern: every row with a non-NULL value matches
    MatchAll,
    /// Pattern shorter than the window: scan the unit dictionary for
    /// units containing it
    DictScan,
    /// Pattern at least window-long: required units per alignment phase,
    /// each sorted smallest-postings-first; a row matches a phase when
    /// all units co-occur with a consistent anchor offset
    Phases(Vec<Vec<RequiredUnit>>),
    /// No narrowing possible for this pattern/config: verify every live
    /// row of the column
    ColumnScan,
}

/// Fully planned Contains leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainsPlan {
    pub column: ColumnId,
    /// Pattern bytes, case-folded per the index configuration
    pub pattern: Vec<u8>,
    pub narrow: Narrow,
    /// Whether candidates need boundary verification against the
    /// authoritative column value
    pub verify: bool,
    pub selectivity: f64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    Leaf(Arc<ContainsPlan>),
    /// Children ordered by ascending selectivity (rarest first)
    And(Vec<PlanNode>),
    Or(Vec<PlanNode>),
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub root: PlanNode,
}

impl ExecutionPlan {
    pub fn selectivity(&self) -> f64 {
        node_selectivity(&self.root)
    }

    pub fn cost(&self) -> f64 {
        node_cost(&self.root)
    }
}

fn node_selectivity(node: &PlanNode) -> f64 {
    match node {
        PlanNode::Leaf(leaf) => leaf.selectivity,
        // Independence assumption, same as the host's default
        PlanNode::And(children) => children.iter().map(node_selectivity).product(),
        PlanNode::Or(children) => children.iter().map(node_selectivity).sum::<f64>().min(1.0),
    }
}

fn node_cost(node: &PlanNode) -> f64 {
    match node {
        PlanNode::Leaf(leaf) => leaf.cost,
        PlanNode::And(children) | PlanNode::Or(children) => children.iter().map(node_cost).sum(),
    }
}

/// Cache of planned leaves, keyed by (column, pattern) and invalidated by
/// structure version. Planning a hot pattern repeatedly costs posting
/// count probes; the cache makes repeat queries cheap.
pub struct PlanCache {
    entries: Mutex<LruCache<(ColumnId, Vec<u8>), (u64, Arc<ContainsPlan>)>>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, column: ColumnId, pattern: &[u8], version: u64) -> Option<Arc<ContainsPlan>> {
        let mut entries = self.entries.lock();
        match entries.get(&(column, pattern.to_vec())) {
            Some((v, plan)) if *v == version => Some(plan.clone()),
            _ => None,
        }
    }

    fn put(&self, column: ColumnId, pattern: Vec<u8>, version: u64, plan: Arc<ContainsPlan>) {
        self.entries.lock().put((column, pattern), (version, plan));
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct QueryPlanner<'a> {
    index: &'a Index,
    cache: Option<&'a PlanCache>,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(index: &'a Index) -> Self {
        Self { index, cache: None }
    }

    pub fn with_cache(index: &'a Index, cache: &'a PlanCache) -> Self {
        Self {
            index,
            cache: Some(cache),
        }
    }

    /// Plan a predicate tree. AND children come out ordered by ascending
    /// selectivity so the executor intersects rarest-first.
    pub fn plan(&self, predicate: &Predicate) -> Result<ExecutionPlan> {
        Ok(ExecutionPlan {
            root: self.plan_node(predicate)?,
        })
    }

    /// Selectivity estimate for the host's cost-based planner.
    pub fn estimate_selectivity(&self, predicate: &Predicate) -> Result<f64> {
        Ok(self.plan(predicate)?.selectivity())
    }

    /// Cost estimate for the host's cost-based planner, comparable
    /// against alternative access paths.
    pub fn estimate_cost(&self, plan: &ExecutionPlan) -> f64 {
        plan.cost()
    }

    fn plan_node(&self, predicate: &Predicate) -> Result<PlanNode> {
        match predicate {
            Predicate::Contains { column, pattern } => {
                Ok(PlanNode::Leaf(self.plan_contains(*column, pattern)?))
            }
            Predicate::And(children) => {
                let mut planned = children
                    .iter()
                    .map(|c| self.plan_node(c))
                    .collect::<Result<Vec<_>>>()?;
                planned.sort_by(|a, b| {
                    node_selectivity(a)
                        .partial_cmp(&node_selectivity(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                Ok(PlanNode::And(planned))
            }
            Predicate::Or(children) => Ok(PlanNode::Or(
                children
                    .iter()
                    .map(|c| self.plan_node(c))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    fn plan_contains(&self, column: ColumnId, pattern: &str) -> Result<Arc<ContainsPlan>> {
        let config = self.index.config();
        if column >= config.columns {
            return Err(IndexError::config(format!(
                "column {} is not indexed (index covers {} columns)",
                column, config.columns
            )));
        }

        let folded = fold(pattern.as_bytes(), config).into_owned();
        let version = self.index.meta().structure_version;

        if let Some(cache) = self.cache {
            if let Some(hit) = cache.get(column, &folded, version) {
                return Ok(hit);
            }
        }

        let plan = Arc::new(self.plan_folded(column, folded.clone()));
        if let Some(cache) = self.cache {
            cache.put(column, folded, version, plan.clone());
        }
        Ok(plan)
    }

    fn plan_folded(&self, column: ColumnId, pattern: Vec<u8>) -> ContainsPlan {
        let config = self.index.config();
        let window = config.window_len as usize;
        let stride = config.stride as usize;
        let live_rows = self.index.live_column_rows(column).len().max(1) as f64;
        let dict_units = self.index.store().unit_count() as f64;

        if pattern.is_empty() {
            return ContainsPlan {
                column,
                pattern,
                narrow: Narrow::MatchAll,
                verify: false,
                selectivity: 1.0,
                cost: live_rows,
            };
        }

        if pattern.len() < window {
            // Coverage holds for substrings up to window_len - stride + 1
            // bytes; anything longer can straddle a window boundary.
            if pattern.len() <= window - stride + 1 {
                let selectivity = 0.5f64.powi(pattern.len() as i32).max(1e-4);
                return ContainsPlan {
                    column,
                    pattern,
                    narrow: Narrow::DictScan,
                    verify: true,
                    selectivity,
                    cost: dict_units + VERIFY_COST_PER_ROW * selectivity * live_rows,
                };
            }
            return ContainsPlan {
                column,
                pattern,
                narrow: Narrow::ColumnScan,
                verify: true,
                selectivity: 1.0,
                cost: VERIFY_COST_PER_ROW * live_rows,
            };
        }

        // One alignment phase per stride residue. A phase with no full
        // window inside the pattern cannot narrow, which forces the
        // conservative column scan.
        let mut phases = Vec::with_capacity(stride);
        let mut truncated = false;
        let mut rarest_postings = usize::MAX;
        let mut posting_cost = 0.0;

        for first in 0..stride as u32 {
            let windows = pattern_windows(&pattern, first, config);
            if windows.is_empty() {
                return ContainsPlan {
                    column,
                    pattern,
                    narrow: Narrow::ColumnScan,
                    verify: true,
                    selectivity: 1.0,
                    cost: VERIFY_COST_PER_ROW * live_rows,
                };
            }

            let mut required: Vec<RequiredUnit> = windows
                .into_iter()
                .map(|(unit, rel_offset)| {
                    let postings = self.index.store().posting_count(&unit);
                    RequiredUnit {
                        unit,
                        rel_offset,
                        postings,
                    }
                })
                .collect();
            required.sort_by_key(|r| r.postings);
            if required.len() > MAX_REQUIRED_UNITS {
                required.truncate(MAX_REQUIRED_UNITS);
                truncated = true;
            }

            rarest_postings = rarest_postings.min(required[0].postings);
            posting_cost += required.iter().map(|r| r.postings as f64).sum::<f64>();
            phases.push(required);
        }

        // Exactness without verification needs gap-free alignment: stride
        // 1 and the full set of pattern windows intersected.
        let verify = stride != 1 || truncated;
        let selectivity = (rarest_postings as f64 / live_rows).min(1.0);
        let cost = posting_cost
            + if verify {
                VERIFY_COST_PER_ROW * selectivity * live_rows
            } else {
                0.0
            };

        ContainsPlan {
            column,
            pattern,
            narrow: Narrow::Phases(phases),
            verify,
            selectivity,
            cost,
        }
    }
}
