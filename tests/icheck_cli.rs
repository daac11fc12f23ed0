//! # Tool Surfaces End to End
//!
//! Drives the `icheck` and `jview` command layers the way the binary does:
//! parse the argument tokens, run against real volumes and journal files,
//! and check the emitted output.

use std::sync::Arc;

use tempfile::tempdir;

use vellum::cli::{IcheckCommand, JviewCommand};
use vellum::encoding::key::encode_text;
use vellum::journal::JournalWriter;
use vellum::journal::record::{SrBody, TsBody, encode_tc};
use vellum::mvcc::AllCommitted;
use vellum::page::codec::KeyedPageMut;
use vellum::pool::{BufferPool, MemoryPool, RecordingCleanupQueue};
use vellum::tree::TreeWriter;
use vellum::verify::CSV_HEADERS;
use vellum::volume::Volume;

fn seeded_volume(name: &str) -> Volume {
    let pool = Arc::new(MemoryPool::new(1024).unwrap());
    let volume = Volume::create(name, 9, pool as Arc<dyn BufferPool>).unwrap();
    for tree_name in ["alpha", "beta"] {
        let mut tree = volume.create_tree(tree_name).unwrap();
        let mut writer = TreeWriter::new(&volume, &mut tree);
        for i in 0..40u32 {
            writer.store(&encode_text(&format!("{}-{:03}", tree_name, i)), &[i as u8; 80]).unwrap();
        }
    }
    volume
}

#[test]
fn icheck_csv_reports_header_and_clean_totals() {
    let volume = seeded_volume("main");
    let command = IcheckCommand::parse(&["trees=*", "uc"]).unwrap();
    let volumes = [&volume];
    let check = command.run(&volumes, &AllCommitted, None).unwrap();

    assert!(!check.has_faults());
    let output = check.output();
    assert_eq!(output[0], format!("Volume,Tree,Faults,{}", CSV_HEADERS));
    let total = output.last().unwrap();
    assert!(total.starts_with("\"*\",\"*\",0,"), "total line: {}", total);
}

#[test]
fn icheck_selector_narrows_to_matching_trees() {
    let volume = seeded_volume("main");
    let command = IcheckCommand::parse(&["trees=main:alpha", "uv"]).unwrap();
    let volumes = [&volume];
    let check = command.run(&volumes, &AllCommitted, None).unwrap();

    assert!(!check.has_faults());
    let text = check.output().join("\n");
    assert!(text.contains("main:alpha"));
    assert!(!text.contains("main:beta"));
}

#[test]
fn icheck_offers_holes_for_repair_with_the_h_flag() {
    let volume = seeded_volume("main");
    // Orphan one leaf of "alpha" by removing its keyblock from the root.
    let tree = volume.get_tree("alpha").unwrap().unwrap();
    assert!(tree.depth >= 2);
    {
        let mut root = volume.pool().get(tree.root, true, true).unwrap();
        let mut page = KeyedPageMut::write(root.bytes_mut().unwrap()).unwrap();
        page.remove(1).unwrap();
    }

    let cleanup = RecordingCleanupQueue::new();
    let command = IcheckCommand::parse(&["trees=*", "uh"]).unwrap();
    let volumes = [&volume];
    let check = command.run(&volumes, &AllCommitted, Some(&cleanup)).unwrap();

    assert!(!check.has_faults(), "faults: {:?}", check.faults());
    assert_eq!(check.index_hole_count(), 1);
    assert_eq!(cleanup.len(), 1);
    assert!(check.output().iter().any(|line| line.contains("unindexed page")));
    assert!(check.output().iter().any(|line| line.contains("enqueued 1 for repair")));
}

#[test]
fn jview_prints_the_selected_transaction() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    writer.append(&TsBody { start_timestamp: 100 }.encode(100), 100).unwrap();
    writer
        .append(
            &SrBody { tree_handle: 1, key: encode_text("k"), value: b"v".to_vec() }.encode(100),
            100,
        )
        .unwrap();
    writer.append(&encode_tc(100), 100).unwrap();
    writer.sync().unwrap();

    let path_arg = format!("path={}", base.display());
    let command = JviewCommand::parse(&[&path_arg, "types=TS,SR,TC"]).unwrap();
    let mut out = Vec::new();
    let visited = command.run(&mut out).unwrap();

    assert_eq!(visited, 3);
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(" TS "));
    assert!(lines[1].contains(" SR ") && lines[1].contains("\"k\""));
    assert!(lines[2].contains(" TC "));
}
