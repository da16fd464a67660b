//! The postings store: indexable unit -> occurrences.
//!
//! Units are kept in lexicographically ordered shards so that short
//! patterns (below the window length) can be resolved with a dictionary
//! containment scan. Shard locks keep unrelated writes from serializing
//! against each other while queries read concurrently.

use crate::index::types::{ColumnId, Posting, PostingList, RowId, Unit};
use memchr::memmem;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use std::hash::Hasher;

const SHARD_COUNT: usize = 16;

#[derive(Debug)]
pub struct PostingsStore {
    shards: Vec<RwLock<BTreeMap<Unit, PostingList>>>,
}

impl Default for PostingsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn shard_of(unit: &[u8]) -> usize {
    let mut hasher = rustc_hash::FxHasher::default();
    hasher.write(unit);
    (hasher.finish() as usize) % SHARD_COUNT
}

impl PostingsStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(BTreeMap::new())).collect(),
        }
    }

    /// Insert one posting. Re-inserting an identical posting is a no-op.
    pub fn insert(&self, unit: &[u8], posting: Posting) {
        let mut shard = self.shards[shard_of(unit)].write();
        shard
            .entry(unit.to_vec())
            .or_default()
            .insert(posting);
    }

    /// Remove all postings for `row`/`column` from the given units,
    /// pruning lists that become empty. The unit set comes from
    /// re-tokenizing the row's old value, so only affected shards are
    /// locked.
    pub fn remove_row_column(&self, units: &[Unit], row: RowId, column: ColumnId) {
        for unit in units {
            let mut shard = self.shards[shard_of(unit)].write();
            if let Some(list) = shard.get_mut(unit) {
                list.remove_row_column(row, column);
                if list.is_empty() {
                    shard.remove(unit);
                }
            }
        }
    }

    /// Physically purge every posting whose row is in `rows` (vacuum of
    /// tombstoned rows). Empty lists are pruned.
    pub fn purge_rows(&self, rows: &RoaringBitmap) {
        for shard in &self.shards {
            let mut shard = shard.write();
            shard.retain(|_, list| {
                let filtered: Vec<Posting> = list
                    .iter()
                    .filter(|p| !rows.contains(p.row))
                    .copied()
                    .collect();
                if filtered.len() != list.len() {
                    *list = PostingList::from_sorted(filtered);
                }
                !list.is_empty()
            });
        }
    }

    /// Fetch the posting list for a unit. An absent unit yields an empty
    /// list, never an error; the postings come back ordered by
    /// (row, column, offset).
    pub fn lookup(&self, unit: &[u8]) -> PostingList {
        let shard = self.shards[shard_of(unit)].read();
        shard.get(unit).cloned().unwrap_or_default()
    }

    /// Posting count for a unit, for selectivity estimation.
    pub fn posting_count(&self, unit: &[u8]) -> usize {
        let shard = self.shards[shard_of(unit)].read();
        shard.get(unit).map(|l| l.len()).unwrap_or(0)
    }

    /// Scan the unit dictionary for units containing `needle`, returning
    /// each hit with the needle's position inside the unit. Used for
    /// patterns shorter than the window length.
    pub fn scan_containing(&self, needle: &[u8]) -> Vec<(Unit, u32, PostingList)> {
        let finder = memmem::Finder::new(needle);
        let mut hits = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            for (unit, list) in shard.iter() {
                if let Some(pos) = finder.find(unit) {
                    hits.push((unit.clone(), pos as u32, list.clone()));
                }
            }
        }
        hits
    }

    /// Number of distinct units.
    pub fn unit_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Total postings across all units.
    pub fn total_postings(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().values().map(|l| l.len()).sum::<usize>())
            .sum()
    }

    /// Rough memory footprint in bytes.
    pub fn approx_bytes(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| {
                s.read()
                    .iter()
                    .map(|(u, l)| (u.len() + l.len() * std::mem::size_of::<Posting>()) as u64)
                    .sum::<u64>()
            })
            .sum()
    }

    /// All entries in lexicographic unit order, for persistence.
    pub fn sorted_entries(&self) -> Vec<(Unit, PostingList)> {
        let mut entries: Vec<(Unit, PostingList)> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .iter()
                    .map(|(u, l)| (u.clone(), l.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Rebuild a store from persisted entries.
    pub fn from_entries(entries: Vec<(Unit, PostingList)>) -> Self {
        let store = Self::new();
        for (unit, list) in entries {
            let mut shard = store.shards[shard_of(&unit)].write();
            shard.insert(unit, list);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(row: RowId, column: ColumnId, offset: u32) -> Posting {
        Posting {
            row,
            column,
            offset,
        }
    }

    #[test]
    fn test_insert_lookup_ordering() {
        let store = PostingsStore::new();
        store.insert(b"ana", p(5, 0, 3));
        store.insert(b"ana", p(1, 0, 1));
        store.insert(b"ana", p(1, 0, 1)); // duplicate, idempotent
        store.insert(b"ana", p(1, 1, 0));

        let list = store.lookup(b"ana");
        let got: Vec<_> = list.iter().map(|p| (p.row, p.column, p.offset)).collect();
        assert_eq!(got, vec![(1, 0, 1), (1, 1, 0), (5, 0, 3)]);
    }

    #[test]
    fn test_lookup_absent_is_empty() {
        let store = PostingsStore::new();
        assert!(store.lookup(b"xyz").is_empty());
        assert_eq!(store.posting_count(b"xyz"), 0);
    }

    #[test]
    fn test_remove_row_column_prunes_empty_lists() {
        let store = PostingsStore::new();
        store.insert(b"ban", p(1, 0, 0));
        store.insert(b"ana", p(1, 0, 1));
        store.insert(b"ana", p(2, 0, 4));

        let units = vec![b"ban".to_vec(), b"ana".to_vec()];
        store.remove_row_column(&units, 1, 0);

        assert!(store.lookup(b"ban").is_empty());
        assert_eq!(store.lookup(b"ana").len(), 1);
        assert_eq!(store.unit_count(), 1);
    }

    #[test]
    fn test_purge_rows() {
        let store = PostingsStore::new();
        store.insert(b"aaa", p(1, 0, 0));
        store.insert(b"aaa", p(2, 0, 0));
        store.insert(b"bbb", p(2, 0, 3));

        let mut dead = RoaringBitmap::new();
        dead.insert(2);
        store.purge_rows(&dead);

        assert_eq!(store.lookup(b"aaa").len(), 1);
        assert!(store.lookup(b"bbb").is_empty());
        assert_eq!(store.unit_count(), 1);
    }

    #[test]
    fn test_scan_containing() {
        let store = PostingsStore::new();
        store.insert(b"ban", p(1, 0, 0));
        store.insert(b"ana", p(1, 0, 1));
        store.insert(b"nan", p(1, 0, 2));
        store.insert(b"xyz", p(2, 0, 0));

        let mut hits = store.scan_containing(b"an");
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        let units: Vec<_> = hits.iter().map(|(u, pos, _)| (u.clone(), *pos)).collect();
        assert_eq!(
            units,
            vec![(b"ana".to_vec(), 0), (b"ban".to_vec(), 1), (b"nan".to_vec(), 2)]
        );
    }

    #[test]
    fn test_sorted_entries_roundtrip() {
        let store = PostingsStore::new();
        store.insert(b"zzz", p(3, 0, 0));
        store.insert(b"aaa", p(1, 0, 0));
        store.insert(b"mmm", p(2, 0, 0));

        let entries = store.sorted_entries();
        let units: Vec<_> = entries.iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(units, vec![b"aaa".to_vec(), b"mmm".to_vec(), b"zzz".to_vec()]);

        let rebuilt = PostingsStore::from_entries(entries);
        assert_eq!(rebuilt.total_postings(), 3);
        assert_eq!(rebuilt.lookup(b"mmm").as_slice()[0].row, 2);
    }
}
