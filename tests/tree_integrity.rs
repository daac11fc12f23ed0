//! # Structural Invariants Under Random Mutation
//!
//! Seeds a tree with random records, applies a random stream of inserts,
//! updates, and deletes, and then requires:
//!
//! 1. The verifier reports zero faults.
//! 2. Keys read in left-to-right page order are strictly increasing.
//! 3. Tree-reachable pages plus garbage pages account for every allocated
//!    page except the volume head.
//! 4. The verifier's byte counters agree with independently computed page
//!    occupancy.
//!
//! The generator is a fixed-seed xorshift so failures reproduce exactly.

use std::collections::BTreeMap;
use std::sync::Arc;

use vellum::encoding::key::encode_text;
use vellum::mvcc::AllCommitted;
use vellum::page::codec::KeyedPage;
use vellum::page::PageType;
use vellum::pool::{BufferPool, MemoryPool};
use vellum::tree::{self, TreeWriter};
use vellum::verify::{IntegrityCheck, VerifyOptions, VolumePlan};
use vellum::volume::Volume;

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn new_volume(page_size: usize) -> Volume {
    let pool = Arc::new(MemoryPool::new(page_size).unwrap());
    Volume::create("rand", 1, pool as Arc<dyn BufferPool>).unwrap()
}

fn quick_options() -> VerifyOptions {
    VerifyOptions {
        suspend_updates: false,
        settle: std::time::Duration::from_millis(0),
        ..VerifyOptions::default()
    }
}

fn mutate(volume: &Volume, tree_name: &str, seed: u64, seeds: usize, ops: usize) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut rng = XorShift(seed);
    let mut model = BTreeMap::new();
    let mut tree = volume.create_tree(tree_name).unwrap();
    let mut writer = TreeWriter::new(volume, &mut tree);

    for _ in 0..seeds {
        let key = encode_text(&format!("key-{:06}", rng.below(100_000)));
        let value = vec![rng.next() as u8; (rng.below(60) + 1) as usize];
        writer.store(&key, &value).unwrap();
        model.insert(key, value);
    }
    for _ in 0..ops {
        let key = encode_text(&format!("key-{:06}", rng.below(100_000)));
        match rng.below(3) {
            0 | 1 => {
                let value = vec![rng.next() as u8; (rng.below(120) + 1) as usize];
                writer.store(&key, &value).unwrap();
                model.insert(key, value);
            }
            _ => {
                let existed = writer.remove(&key).unwrap();
                assert_eq!(existed, model.remove(&key).is_some());
            }
        }
    }
    model
}

#[test]
fn randomized_tree_matches_model_and_verifies_clean() {
    let volume = new_volume(1024);
    let model = mutate(&volume, "t", 0x9E3779B97F4A7C15, 300, 600);

    let tree = volume.get_tree("t").unwrap().unwrap();
    let records = tree::scan_records(&volume, &tree).unwrap();
    let scanned_keys: Vec<Vec<u8>> = records.into_iter().map(|(key, _)| key).collect();
    let model_keys: Vec<Vec<u8>> = model.keys().cloned().collect();
    assert_eq!(scanned_keys, model_keys);
    // Values resolve through the read path, which unwraps any overlay
    // encoding the store path applied.
    for (key, value) in &model {
        let fetched = tree::fetch(&volume, &tree, key, u64::MAX, &AllCommitted).unwrap();
        assert_eq!(fetched.as_deref(), Some(value.as_slice()));
    }

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    assert!(check.check_volume(&volume).unwrap(), "faults: {:?}", check.faults());
    assert_eq!(check.faults().len(), 0);
}

#[test]
fn keys_scan_strictly_increasing_after_mutation() {
    let volume = new_volume(1024);
    mutate(&volume, "t", 42, 200, 400);

    let tree = volume.get_tree("t").unwrap().unwrap();
    let records = tree::scan_records(&volume, &tree).unwrap();
    assert!(!records.is_empty());
    for pair in records.windows(2) {
        assert!(pair[0].0 < pair[1].0, "keys out of order: {:?} then {:?}", pair[0].0, pair[1].0);
    }
}

#[test]
fn every_allocated_page_is_tree_reachable_or_garbage() {
    let volume = new_volume(1024);
    mutate(&volume, "t", 7, 250, 500);
    // Long values spill chains, deletes push them back to the garbage list.
    {
        let mut tree = volume.get_tree("t").unwrap().unwrap();
        let mut writer = TreeWriter::new(&volume, &mut tree);
        for i in 0..5u32 {
            writer.store(&encode_text(&format!("big-{}", i)), &vec![i as u8; 3000]).unwrap();
        }
        writer.remove(&encode_text("big-0")).unwrap();
        writer.remove(&encode_text("big-3")).unwrap();
    }

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    assert!(check.check_volume(&volume).unwrap(), "faults: {:?}", check.faults());

    let next_available = volume.head().unwrap().next_available;
    assert_eq!(
        check.tree_page_count() + check.garbage_page_count(),
        next_available - 1,
        "page accounting mismatch: {} tree + {} garbage != {} allocated",
        check.tree_page_count(),
        check.garbage_page_count(),
        next_available - 1
    );
}

#[test]
fn verifier_byte_counters_match_page_occupancy() {
    let volume = new_volume(2048);
    mutate(&volume, "t", 99, 250, 250);

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    let plans =
        [VolumePlan { volume: &volume, whole_volume: true, trees: Vec::new() }];
    check.run(&plans, true).unwrap();
    assert_eq!(check.faults().len(), 0);

    // Recompute occupancy independently, page by page.
    let mut data_bytes = 0u64;
    let mut index_bytes = 0u64;
    let next_available = volume.head().unwrap().next_available;
    for page_address in 1..next_available {
        let buffer = volume.pool().get(page_address, false, true).unwrap();
        let page_type = buffer.header().unwrap().page_type();
        match page_type {
            PageType::Data => {
                data_bytes += KeyedPage::read(buffer.bytes()).unwrap().bytes_in_use().unwrap() as u64;
            }
            PageType::Index(_) => {
                index_bytes += KeyedPage::read(buffer.bytes()).unwrap().bytes_in_use().unwrap() as u64;
            }
            _ => {}
        }
    }
    assert_eq!(check.counters().data_bytes_in_use, data_bytes);
    assert_eq!(check.counters().index_bytes_in_use, index_bytes);
}

#[test]
fn dropping_one_of_two_trees_keeps_the_other_verifiable() {
    let volume = new_volume(1024);
    mutate(&volume, "keep", 5, 150, 150);
    let dropped_model = mutate(&volume, "drop", 6, 150, 150);
    assert!(!dropped_model.is_empty());

    let doomed = volume.get_tree("drop").unwrap().unwrap();
    volume.drop_tree(&doomed).unwrap();

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    assert!(check.check_volume(&volume).unwrap(), "faults: {:?}", check.faults());
    assert!(check.garbage_page_count() > 0);

    let kept = volume.get_tree("keep").unwrap().unwrap();
    let records = tree::scan_records(&volume, &kept).unwrap();
    let visible = tree::fetch(&volume, &kept, &records[0].0, u64::MAX, &AllCommitted).unwrap();
    assert!(visible.is_some());
}
