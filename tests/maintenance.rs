//! Incremental maintenance must be indistinguishable from a rebuild: after
//! any sequence of inserts, updates, and deletes, queries against the
//! maintained index equal queries against a from-scratch build of the
//! surviving rows.

use biscuit::{Biscuit, CancelToken, MemoryHeap, Predicate, WindowConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const PROBES: &[&str] = &["", "a", "an", "ban", "anana", "and", "d b"];

fn random_value(rng: &mut StdRng) -> String {
    const ALPHABET: &[u8] = b"aban d";
    let len = rng.gen_range(0..20);
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Search the maintained index and a fresh rebuild with every probe and
/// demand identical answers.
fn assert_build_equivalent(index: &Biscuit, heap: &MemoryHeap) {
    let fresh = Biscuit::build(index.config(), heap, None).unwrap();
    for probe in PROBES {
        let maintained = index
            .search(&Predicate::contains(0, *probe), heap, None)
            .unwrap();
        let rebuilt = fresh
            .search(&Predicate::contains(0, *probe), heap, None)
            .unwrap();
        assert_eq!(maintained, rebuilt, "probe {probe:?} diverged from rebuild");
    }
}

#[test]
fn test_random_mutation_sequence_is_build_equivalent() {
    let mut rng = StdRng::seed_from_u64(0xD0E);
    let mut heap = MemoryHeap::new();
    for _ in 0..100 {
        let v = random_value(&mut rng);
        heap.push_row(vec![Some(v)]);
    }
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();

    for step in 0..200 {
        match rng.gen_range(0..3) {
            0 => {
                let v = random_value(&mut rng);
                let row = heap.push_row(vec![Some(v.clone())]);
                index.insert_row(row, &[Some(v.as_str())]).unwrap();
            }
            1 => {
                let row = rng.gen_range(0..heap.row_count() as u32);
                let new = random_value(&mut rng);
                let old = heap.update_row(row, vec![Some(new.clone())]);
                index
                    .update_row(row, &[old[0].as_deref()], &[Some(new.as_str())])
                    .unwrap();
            }
            _ => {
                let row = rng.gen_range(0..heap.row_count() as u32);
                heap.delete_row(row);
                index.delete_row(row);
            }
        }
        if step % 50 == 49 {
            assert_build_equivalent(&index, &heap);
        }
    }

    index.vacuum();
    assert_build_equivalent(&index, &heap);
}

#[test]
fn test_insert_retry_is_idempotent() {
    let mut heap = MemoryHeap::new();
    heap.push_row(vec![Some("banana".into())]);
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();

    // A host retrying after a crash re-runs the same insert.
    index.insert_row(0, &[Some("banana")]).unwrap();
    index.insert_row(0, &[Some("banana")]).unwrap();

    assert_build_equivalent(&index, &heap);
    let stats = index.stats();
    assert_eq!(stats.row_count, 1);
}

#[test]
fn test_update_to_null_and_back() {
    let mut heap = MemoryHeap::new();
    heap.push_row(vec![Some("banana".into())]);
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();

    heap.update_row(0, vec![None]);
    index.update_row(0, &[Some("banana")], &[None]).unwrap();
    assert!(index
        .search(&Predicate::contains(0, ""), &heap, None)
        .unwrap()
        .is_empty());
    assert_build_equivalent(&index, &heap);

    heap.update_row(0, vec![Some("cherry".into())]);
    index.update_row(0, &[None], &[Some("cherry")]).unwrap();
    assert_eq!(
        index
            .search(&Predicate::contains(0, "err"), &heap, None)
            .unwrap(),
        vec![0]
    );
    assert_build_equivalent(&index, &heap);
}

#[test]
fn test_vacuum_reclaims_tombstones() {
    let mut heap = MemoryHeap::new();
    for i in 0..50 {
        heap.push_row(vec![Some(format!("value number {i}"))]);
    }
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();
    let postings_before = index.stats().posting_count;

    for row in 0..25 {
        heap.delete_row(row);
        index.delete_row(row);
    }
    // Tombstoned but not yet purged.
    assert_eq!(index.stats().tombstone_count, 25);
    assert_eq!(index.stats().posting_count, postings_before);

    index.vacuum();
    let stats = index.stats();
    assert_eq!(stats.tombstone_count, 0);
    assert_eq!(stats.row_count, 25);
    assert!(stats.posting_count < postings_before);
    assert_build_equivalent(&index, &heap);
}

#[test]
fn test_automatic_purge_after_many_deletes() {
    let mut heap = MemoryHeap::new();
    for i in 0..1200 {
        heap.push_row(vec![Some(format!("row {i}"))]);
    }
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();

    for row in 0..1100 {
        heap.delete_row(row);
        index.delete_row(row);
    }
    // The cleanup threshold fired somewhere along the way.
    assert!(index.stats().tombstone_count < 1100);
    assert_build_equivalent(&index, &heap);
}

#[test]
fn test_concurrent_queries_during_maintenance() {
    let mut heap = MemoryHeap::new();
    for i in 0..500 {
        heap.push_row(vec![Some(format!("banana stand {i}"))]);
    }
    let heap = Arc::new(heap);
    let index = Arc::new(Biscuit::build(WindowConfig::default(), heap.as_ref(), None).unwrap());

    let mut readers = Vec::new();
    for _ in 0..4 {
        let index = index.clone();
        let heap = Arc::clone(&heap);
        readers.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let rows = index
                    .search(&Predicate::contains(0, "banana"), heap.as_ref(), None)
                    .unwrap();
                // Writers only add rows, so the baseline never shrinks.
                assert!(rows.len() >= 500);
            }
        }));
    }

    let writer = {
        let index = index.clone();
        std::thread::spawn(move || {
            for i in 500u32..600 {
                let value = format!("banana stand {i}");
                index.insert_row(i, &[Some(value.as_str())]).unwrap();
            }
        })
    };

    for t in readers {
        t.join().unwrap();
    }
    writer.join().unwrap();
    assert_eq!(index.stats().row_count, 600);
}

#[test]
fn test_cancelled_rebuild_leaves_old_structure() {
    let mut heap = MemoryHeap::new();
    for i in 0..3000 {
        heap.push_row(vec![Some(format!("row number {i}"))]);
    }
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();
    let version = index.stats().structure_version;

    let token = CancelToken::new();
    token.cancel();
    assert!(index.rebuild(&heap, Some(&token)).is_err());

    // The failed rebuild must not have swapped anything in.
    assert_eq!(index.stats().structure_version, version);
    assert_eq!(index.stats().row_count, 3000);
}
