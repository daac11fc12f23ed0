//! # Pruning Through the Verifier
//!
//! Builds trees whose values carry multi-version overlays, including
//! aborted writers, and runs the verifier with pruning enabled:
//!
//! - pages carrying versions are counted and pruned
//! - what any live snapshot resolves is unchanged by pruning
//! - prune-and-clear refuses partial selections and resets the transaction
//!   index after a fully clean pruning run

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use vellum::encoding::key::encode_text;
use vellum::error::{ErrorKind, kind_of};
use vellum::mvcc::{CommitStatus, TransactionIndex};
use vellum::pool::{BufferPool, MemoryPool};
use vellum::tree::{self, TreeWriter};
use vellum::verify::{IntegrityCheck, VerifyOptions, VolumePlan};
use vellum::volume::Volume;

/// Versions are committed unless listed, and `reset_mvv_counts` calls are
/// counted.
struct Oracle {
    aborted: Vec<u64>,
    unknown: Vec<u64>,
    resets: AtomicUsize,
}

impl Oracle {
    fn new(aborted: &[u64], unknown: &[u64]) -> Self {
        Self { aborted: aborted.to_vec(), unknown: unknown.to_vec(), resets: AtomicUsize::new(0) }
    }
}

impl TransactionIndex for Oracle {
    fn committed(&self, version: u64) -> CommitStatus {
        if self.aborted.contains(&version) {
            CommitStatus::Aborted
        } else if self.unknown.contains(&version) {
            CommitStatus::Unknown
        } else {
            CommitStatus::Committed
        }
    }

    fn reset_mvv_counts(&self, _since_timestamp: u64) -> usize {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.aborted.len()
    }
}

fn prune_options() -> VerifyOptions {
    VerifyOptions {
        suspend_updates: false,
        prune: true,
        settle: std::time::Duration::from_millis(0),
        ..VerifyOptions::default()
    }
}

fn versioned_volume(aborted_version: u64) -> Volume {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    let volume = Volume::create("vol", 1, pool as Arc<dyn BufferPool>).unwrap();
    let mut tree = volume.create_tree("t").unwrap();
    let mut writer = TreeWriter::new(&volume, &mut tree);
    for i in 0..20u32 {
        let key = encode_text(&format!("row-{:03}", i));
        writer.store(&key, format!("base-{}", i).as_bytes()).unwrap();
        writer.store_version(&key, 10, Some(format!("v10-{}", i).as_bytes())).unwrap();
        writer.store_version(&key, aborted_version, Some(b"aborted junk")).unwrap();
    }
    volume
}

#[test]
fn pruning_drops_aborted_versions_and_counts_pages() {
    let oracle = Oracle::new(&[15], &[]);
    let volume = versioned_volume(15);

    let mut check = IntegrityCheck::new(&oracle, prune_options());
    assert!(check.check_volume(&volume).unwrap(), "faults: {:?}", check.faults());
    assert!(check.counters().mvv_page_count > 0);
    assert_eq!(check.counters().mvv_page_count, check.counters().pruned_page_count);
    assert_eq!(check.counters().pruning_error_count, 0);

    // The aborted version is gone; the newest committed one is what any
    // current snapshot resolves.
    let tree = volume.get_tree("t").unwrap().unwrap();
    for i in 0..20u32 {
        let key = encode_text(&format!("row-{:03}", i));
        let visible = tree::fetch(&volume, &tree, &key, u64::MAX, &oracle).unwrap();
        assert_eq!(visible.as_deref(), Some(format!("v10-{}", i).as_bytes()));
    }
}

#[test]
fn pruning_preserves_snapshot_contents() {
    let oracle = Oracle::new(&[15], &[]);
    let volume = versioned_volume(15);
    let tree = volume.get_tree("t").unwrap().unwrap();

    // The pruning floor is allocated at check time, so every snapshot the
    // engine can still serve is at or above it.
    let floor = volume.timestamps().current();
    let key = encode_text("row-007");
    let before: Vec<Option<Vec<u8>>> = (floor..floor + 3)
        .map(|snapshot| tree::fetch(&volume, &tree, &key, snapshot, &oracle).unwrap())
        .collect();

    let mut check = IntegrityCheck::new(&oracle, prune_options());
    assert!(check.check_volume(&volume).unwrap());

    let after: Vec<Option<Vec<u8>>> = (floor..floor + 3)
        .map(|snapshot| tree::fetch(&volume, &tree, &key, snapshot, &oracle).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn unknown_versions_survive_pruning() {
    let oracle = Oracle::new(&[], &[15]);
    let volume = versioned_volume(15);

    let mut check = IntegrityCheck::new(&oracle, prune_options());
    assert!(check.check_volume(&volume).unwrap());

    // Version 15 is unresolved, so the overlays must still carry it.
    let tree = volume.get_tree("t").unwrap().unwrap();
    let raw = tree::lookup_raw(&volume, &tree, &encode_text("row-000")).unwrap().unwrap();
    let mut handles = Vec::new();
    vellum::mvcc::value::visit_versions(&raw, |version, _, _| {
        handles.push(version);
        Ok(())
    })
    .unwrap();
    assert!(handles.contains(&15));
}

#[test]
fn prune_and_clear_requires_select_all() {
    let oracle = Oracle::new(&[], &[]);
    let volume = versioned_volume(15);
    let options = VerifyOptions { prune_and_clear: true, prune: true, ..prune_options() };
    let mut check = IntegrityCheck::new(&oracle, options);

    let plans = [VolumePlan { volume: &volume, whole_volume: true, trees: Vec::new() }];
    let err = check.run(&plans, false).unwrap_err();
    assert!(matches!(kind_of(&err), Some(ErrorKind::StateViolation(_))), "{err:#}");
    assert_eq!(oracle.resets.load(Ordering::SeqCst), 0);
}

#[test]
fn prune_and_clear_resets_the_transaction_index_after_a_clean_run() {
    let oracle = Oracle::new(&[15], &[]);
    let volume = versioned_volume(15);
    let options = VerifyOptions { prune_and_clear: true, prune: true, ..prune_options() };
    let mut check = IntegrityCheck::new(&oracle, options);

    let plans = [VolumePlan { volume: &volume, whole_volume: true, trees: Vec::new() }];
    check.run(&plans, true).unwrap();

    assert_eq!(check.faults().len(), 0);
    assert_eq!(oracle.resets.load(Ordering::SeqCst), 1);
    assert!(
        check.output().iter().any(|line| line.contains("cleared by pruning")),
        "output: {:?}",
        check.output()
    );
}

#[test]
fn read_only_volumes_are_never_pruned() {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    {
        let volume = Volume::create("vol", 1, Arc::clone(&pool) as Arc<dyn BufferPool>).unwrap();
        let mut tree = volume.create_tree("t").unwrap();
        let mut writer = TreeWriter::new(&volume, &mut tree);
        writer.store(&encode_text("k"), b"base").unwrap();
        writer.store_version(&encode_text("k"), 10, Some(b"v10")).unwrap();
    }
    let volume = Volume::open("vol", pool as Arc<dyn BufferPool>, true).unwrap();
    let oracle = Oracle::new(&[], &[]);
    let mut check = IntegrityCheck::new(&oracle, prune_options());
    assert!(check.check_volume(&volume).unwrap());

    assert!(check.counters().mvv_page_count > 0);
    assert_eq!(check.counters().pruned_page_count, 0);
}
