//! # Verifier Fault and Repair Scenarios
//!
//! Deliberate structural damage, checked for the exact diagnosis:
//!
//! - a leaf missing from its parent's keyblocks is one index hole at level
//!   0, with no other faults, and is offered for repair when enabled
//! - a child referenced twice is a multiple-parent fault
//! - in-page corruption is a fault that does not stop the run

use std::sync::Arc;

use vellum::encoding::key::encode_text;
use vellum::mvcc::AllCommitted;
use vellum::page::codec::{KeyedPage, KeyedPageMut};
use vellum::page::keyblock::{Keyblock, write_keyblock};
use vellum::pool::{BufferPool, MemoryPool, RecordingCleanupQueue};
use vellum::tree::TreeWriter;
use vellum::verify::{IntegrityCheck, VerifyOptions};
use vellum::volume::Volume;

fn quick_options() -> VerifyOptions {
    VerifyOptions {
        suspend_updates: false,
        settle: std::time::Duration::from_millis(0),
        ..VerifyOptions::default()
    }
}

/// A volume with one tree deep enough to have several leaves under an index
/// root. Returns the tree name.
fn build_two_level_tree(volume: &Volume) -> &'static str {
    let mut tree = volume.create_tree("t").unwrap();
    let mut writer = TreeWriter::new(volume, &mut tree);
    for i in 0..48u32 {
        writer.store(&encode_text(&format!("row-{:04}", i)), &[i as u8; 96]).unwrap();
    }
    assert!(writer.tree().depth == 2, "expected a two-level tree, got depth {}", writer.tree().depth);
    "t"
}

#[test]
fn orphaned_leaf_is_one_index_hole_and_nothing_else() {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    let volume = Volume::create("vol", 1, pool as Arc<dyn BufferPool>).unwrap();
    build_two_level_tree(&volume);
    let tree = volume.get_tree("t").unwrap().unwrap();

    // Remove the second child's keyblock from the root, orphaning that leaf
    // from the index while its left sibling still links to it.
    let orphan = {
        let mut root = volume.pool().get(tree.root, true, true).unwrap();
        let mut page = KeyedPageMut::write(root.bytes_mut().unwrap()).unwrap();
        let orphan = page.as_read().child_at(1).unwrap();
        page.remove(1).unwrap();
        orphan
    };

    let cleanup = RecordingCleanupQueue::new();
    let mut check = IntegrityCheck::new(&AllCommitted, VerifyOptions { fix_holes: true, ..quick_options() })
        .with_cleanup(&cleanup);
    let clean = check.check_tree(&volume, &tree).unwrap();

    assert!(clean, "unexpected faults: {:?}", check.faults());
    assert_eq!(check.index_hole_count(), 1);
    let holes = cleanup.drain();
    assert_eq!(holes.len(), 1);
    assert_eq!(holes[0].page_address, orphan);
    assert_eq!(holes[0].level, 0);
    assert_eq!(holes[0].tree_handle, tree.handle);
}

#[test]
fn duplicate_child_pointer_is_a_multiple_parent_fault() {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    let volume = Volume::create("vol", 1, pool as Arc<dyn BufferPool>).unwrap();
    build_two_level_tree(&volume);
    let tree = volume.get_tree("t").unwrap().unwrap();

    let first_child = {
        let root = volume.pool().get(tree.root, false, true).unwrap();
        KeyedPage::read(root.bytes()).unwrap().child_at(0).unwrap()
    };
    {
        let mut root = volume.pool().get(tree.root, true, true).unwrap();
        let mut page = KeyedPageMut::write(root.bytes_mut().unwrap()).unwrap();
        page.replace_value(2, &first_child.to_be_bytes()).unwrap();
    }

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    let clean = check.check_tree(&volume, &tree).unwrap();
    assert!(!clean);
    assert!(
        check.faults().iter().any(|f| f.description.contains("more than one parent")),
        "faults: {:?}",
        check.faults()
    );
}

#[test]
fn in_page_corruption_is_reported_and_the_run_finishes() {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    let volume = Volume::create("vol", 1, pool as Arc<dyn BufferPool>).unwrap();
    build_two_level_tree(&volume);
    let tree = volume.get_tree("t").unwrap().unwrap();

    // Damage one leaf: point its first keyblock's tail below the tail
    // region.
    let victim = {
        let root = volume.pool().get(tree.root, false, true).unwrap();
        KeyedPage::read(root.bytes()).unwrap().child_at(0).unwrap()
    };
    {
        let mut leaf = volume.pool().get(victim, true, true).unwrap();
        write_keyblock(leaf.bytes_mut().unwrap(), 0, Keyblock::new(0, b'x', 64));
    }

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    let clean = check.check_tree(&volume, &tree).unwrap();
    assert!(!clean);
    assert!(
        check.faults().iter().any(|f| f.description.contains("outside tail region")),
        "faults: {:?}",
        check.faults()
    );
    // The rest of the tree was still visited.
    assert!(check.counters().data_page_count >= 4);
}

#[test]
fn cancellation_leaves_partial_results() {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    let volume = Volume::create("vol", 1, pool as Arc<dyn BufferPool>).unwrap();
    build_two_level_tree(&volume);
    let tree = volume.get_tree("t").unwrap().unwrap();

    let mut check = IntegrityCheck::new(&AllCommitted, quick_options());
    check.stop_flag().store(true, std::sync::atomic::Ordering::Relaxed);
    let clean = check.check_tree(&volume, &tree).unwrap();
    assert!(clean, "a cancelled run records no spurious faults");
    assert_eq!(check.counters().data_page_count, 0);
}
