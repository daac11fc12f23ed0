//! # Journal Write, Scan, and Corruption Handling
//!
//! Covers the journal contract end to end on real files:
//!
//! - a transaction's records scan back in order with their timestamps
//! - every record type round-trips through a file byte-identically
//! - corruption (bad length, bad checksum, disagreeing block sizes) aborts
//!   the scan with a corrupt-journal error
//! - a truncated tail reports an abnormal end of file and the scan ends at
//!   the missing next file

use tempfile::tempdir;

use vellum::error::{ErrorKind, kind_of};
use vellum::journal::record::{
    CpBody, DrBody, DtBody, ItBody, IvBody, JhBody, PaBody, PmBody, PmEntry, SrBody, TmBody,
    TmEntry, TsBody, encode_tc,
};
use vellum::journal::scanner::{JournalScanner, JournalVisitor, RecordMeta, ScanConfig, TypeFilter};
use vellum::journal::{DumpWriter, JournalWriter, generation_to_file};

#[derive(Default)]
struct Collector {
    lines: Vec<(u64, String)>,
    eofs: Vec<u64>,
    pa_pages: Vec<u64>,
    sr: Vec<SrBody>,
}

impl JournalVisitor for Collector {
    fn jh(&mut self, meta: &RecordMeta, _body: &JhBody) -> eyre::Result<()> {
        self.lines.push((meta.timestamp, "JH".to_string()));
        Ok(())
    }
    fn ts(&mut self, meta: &RecordMeta, _body: &TsBody) -> eyre::Result<()> {
        self.lines.push((meta.timestamp, "TS".to_string()));
        Ok(())
    }
    fn tc(&mut self, meta: &RecordMeta) -> eyre::Result<()> {
        self.lines.push((meta.timestamp, "TC".to_string()));
        Ok(())
    }
    fn sr(&mut self, meta: &RecordMeta, body: &SrBody) -> eyre::Result<()> {
        self.lines.push((meta.timestamp, "SR".to_string()));
        self.sr.push(body.clone());
        Ok(())
    }
    fn pa(&mut self, _meta: &RecordMeta, body: &PaBody) -> eyre::Result<()> {
        self.pa_pages.push(body.page_address);
        Ok(())
    }
    fn eof(&mut self, address: u64) -> eyre::Result<()> {
        self.eofs.push(address);
        Ok(())
    }
}

#[test]
fn transaction_records_scan_in_order_with_type_filter() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    writer.append(&TsBody { start_timestamp: 100 }.encode(100), 100).unwrap();
    writer
        .append(
            &SrBody { tree_handle: 1, key: b"k".to_vec(), value: b"v".to_vec() }.encode(100),
            100,
        )
        .unwrap();
    writer.append(&encode_tc(100), 100).unwrap();
    writer.sync().unwrap();

    let mut config = ScanConfig::new(&base);
    config.types = TypeFilter::parse("TS,SR,TC").unwrap();
    let mut collector = Collector::default();
    let visited = JournalScanner::new(config).scan(&mut collector).unwrap();

    assert_eq!(visited, 3);
    assert_eq!(
        collector.lines,
        vec![(100, "TS".to_string()), (100, "SR".to_string()), (100, "TC".to_string())]
    );
    assert_eq!(collector.sr[0].key, b"k");
    assert_eq!(collector.sr[0].value, b"v");
}

#[test]
fn dump_writes_one_line_per_selected_record() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    writer.append(&TsBody { start_timestamp: 100 }.encode(100), 100).unwrap();
    writer
        .append(
            &SrBody { tree_handle: 1, key: b"k".to_vec(), value: b"v".to_vec() }.encode(100),
            100,
        )
        .unwrap();
    writer.append(&encode_tc(100), 100).unwrap();
    writer.sync().unwrap();

    let mut config = ScanConfig::new(&base);
    config.types = TypeFilter::parse("TS,SR,TC").unwrap();
    let mut out = Vec::new();
    {
        let mut dump = DumpWriter::new(&mut out, 42, 42, false);
        JournalScanner::new(config).scan(&mut dump).unwrap();
    }
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(" TS "));
    assert!(lines[1].contains(" SR "));
    assert!(lines[2].contains(" TC "));
    for line in lines {
        assert!(line.contains("100"), "missing timestamp in {:?}", line);
    }
}

#[test]
fn every_record_type_round_trips_through_a_file() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();

    let iv = IvBody { handle: 1, volume_id: 77, name: "main".to_string() };
    let it = ItBody { handle: 2, volume_handle: 1, tree_name: "accounts".to_string() };
    let pa = PaBody { volume_handle: 1, page_address: 12, page: vec![0x5A; 1024] };
    let pm = PmBody {
        entries: vec![PmEntry { volume_handle: 1, page_address: 12, timestamp: 5, journal_address: 64 }],
    };
    let tm = TmBody {
        entries: vec![TmEntry {
            start_timestamp: 9,
            commit_timestamp: 11,
            journal_address: 128,
            committed: true,
        }],
    };
    let cp = CpBody { base_address: 0, system_time_ms: 1_700_000_000_000 };
    let sr = SrBody { tree_handle: 2, key: b"key".to_vec(), value: b"value".to_vec() };
    let dr = DrBody { tree_handle: 2, key1: b"a".to_vec(), key2: b"m".to_vec() };
    let dt = DtBody { tree_handle: 2 };

    writer.append(&iv.encode(1), 1).unwrap();
    writer.append(&it.encode(2), 2).unwrap();
    writer.append(&pa.encode(3), 3).unwrap();
    writer.append(&pm.encode(4), 4).unwrap();
    writer.append(&tm.encode(5), 5).unwrap();
    writer.append(&cp.encode(6), 6).unwrap();
    writer.append(&TsBody { start_timestamp: 7 }.encode(7), 7).unwrap();
    writer.append(&sr.encode(7), 7).unwrap();
    writer.append(&dr.encode(7), 7).unwrap();
    writer.append(&dt.encode(7), 7).unwrap();
    writer.append(&encode_tc(8), 8).unwrap();
    writer.sync().unwrap();

    #[derive(Default)]
    struct Everything {
        iv: Option<IvBody>,
        it: Option<ItBody>,
        pa: Option<PaBody>,
        pm: Option<PmBody>,
        tm: Option<TmBody>,
        cp: Option<CpBody>,
        dr: Option<DrBody>,
        dt: Option<DtBody>,
        sizes_ok: bool,
    }
    impl JournalVisitor for Everything {
        fn iv(&mut self, _m: &RecordMeta, body: &IvBody) -> eyre::Result<()> {
            self.iv = Some(body.clone());
            Ok(())
        }
        fn it(&mut self, _m: &RecordMeta, body: &ItBody) -> eyre::Result<()> {
            self.it = Some(body.clone());
            Ok(())
        }
        fn pa(&mut self, meta: &RecordMeta, body: &PaBody) -> eyre::Result<()> {
            self.sizes_ok = meta.size as usize == 16 + 12 + body.page.len();
            self.pa = Some(body.clone());
            Ok(())
        }
        fn pm(&mut self, _m: &RecordMeta, body: &PmBody) -> eyre::Result<()> {
            self.pm = Some(body.clone());
            Ok(())
        }
        fn tm(&mut self, _m: &RecordMeta, body: &TmBody) -> eyre::Result<()> {
            self.tm = Some(body.clone());
            Ok(())
        }
        fn cp(&mut self, _m: &RecordMeta, body: &CpBody) -> eyre::Result<()> {
            self.cp = Some(*body);
            Ok(())
        }
        fn dr(&mut self, _m: &RecordMeta, body: &DrBody) -> eyre::Result<()> {
            self.dr = Some(body.clone());
            Ok(())
        }
        fn dt(&mut self, _m: &RecordMeta, body: &DtBody) -> eyre::Result<()> {
            self.dt = Some(*body);
            Ok(())
        }
    }

    let mut everything = Everything::default();
    JournalScanner::new(ScanConfig::new(&base)).scan(&mut everything).unwrap();

    assert_eq!(everything.iv.unwrap(), iv);
    assert_eq!(everything.it.unwrap(), it);
    assert_eq!(everything.pa.unwrap(), pa);
    assert!(everything.sizes_ok);
    assert_eq!(everything.pm.unwrap(), pm);
    assert_eq!(everything.tm.unwrap(), tm);
    assert_eq!(everything.cp.unwrap(), cp);
    assert_eq!(everything.dr.unwrap(), dr);
    assert_eq!(everything.dt.unwrap(), dt);
}

#[test]
fn page_and_timestamp_filters_narrow_pa_records() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    for (page, ts) in [(5u64, 10u64), (6, 20), (7, 30)] {
        let pa = PaBody { volume_handle: 1, page_address: page, page: vec![0; 64] };
        writer.append(&pa.encode(ts), ts).unwrap();
    }
    writer.sync().unwrap();

    let mut config = ScanConfig::new(&base);
    config.types = TypeFilter::parse("PA").unwrap();
    config.pages = vellum::journal::scanner::RangePredicate::parse("5-6").unwrap();
    config.timestamps = vellum::journal::scanner::RangePredicate::parse("15-").unwrap();
    let mut collector = Collector::default();
    JournalScanner::new(config).scan(&mut collector).unwrap();
    assert_eq!(collector.pa_pages, vec![6]);
}

#[test]
fn truncated_tail_reports_eof_then_scan_ends_at_missing_file() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    writer.append(&TsBody { start_timestamp: 1 }.encode(1), 1).unwrap();
    writer.sync().unwrap();

    // Truncate mid-record to simulate a producer crash.
    let file = generation_to_file(&base, 0);
    let full = std::fs::metadata(&file).unwrap().len();
    let handle = std::fs::OpenOptions::new().write(true).open(&file).unwrap();
    handle.set_len(full - 4).unwrap();

    let mut collector = Collector::default();
    JournalScanner::new(ScanConfig::new(&base)).scan(&mut collector).unwrap();
    assert_eq!(collector.eofs.len(), 1);
    assert_eq!(collector.lines.iter().filter(|(_, t)| t == "TS").count(), 0);
}

#[test]
fn bad_record_length_is_corrupt_journal() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    writer.append(&TsBody { start_timestamp: 1 }.encode(1), 1).unwrap();
    writer.sync().unwrap();

    // Overwrite the TS record's length field (the record after the JH).
    let file = generation_to_file(&base, 0);
    let mut bytes = std::fs::read(&file).unwrap();
    let ts_offset = 52; // JH record: 16 overhead + 36 body
    bytes[ts_offset + 2..ts_offset + 6].copy_from_slice(&3u32.to_be_bytes());
    std::fs::write(&file, bytes).unwrap();

    let err = JournalScanner::new(ScanConfig::new(&base)).scan(&mut Collector::default()).unwrap_err();
    assert!(matches!(kind_of(&err), Some(ErrorKind::CorruptJournal(_))), "{err:#}");
}

#[test]
fn checksum_mismatch_is_corrupt_journal() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 1_000_000_000).unwrap();
    writer
        .append(
            &SrBody { tree_handle: 1, key: b"k".to_vec(), value: b"v".to_vec() }.encode(2),
            2,
        )
        .unwrap();
    writer.sync().unwrap();

    let file = generation_to_file(&base, 0);
    let mut bytes = std::fs::read(&file).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&file, bytes).unwrap();

    let err = JournalScanner::new(ScanConfig::new(&base)).scan(&mut Collector::default()).unwrap_err();
    assert!(matches!(kind_of(&err), Some(ErrorKind::CorruptJournal(_))), "{err:#}");
}

#[test]
fn records_roll_across_blocks_and_scan_back() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    let mut writer = JournalWriter::create(&base, 512).unwrap();
    for ts in 0..40u64 {
        writer.append(&TsBody { start_timestamp: ts }.encode(ts), ts).unwrap();
    }
    writer.sync().unwrap();
    assert!(generation_to_file(&base, 1).exists());

    let mut config = ScanConfig::new(&base);
    config.types = TypeFilter::parse("TS").unwrap();
    let mut collector = Collector::default();
    let visited = JournalScanner::new(config).scan(&mut collector).unwrap();
    assert_eq!(visited, 40);
}

#[test]
fn disagreeing_block_sizes_across_files_are_corrupt() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("j");
    {
        let mut writer = JournalWriter::create(&base, 512).unwrap();
        for ts in 0..40u64 {
            writer.append(&TsBody { start_timestamp: ts }.encode(ts), ts).unwrap();
        }
        writer.sync().unwrap();
    }
    // Rewrite generation 1 with a JH declaring a different block size.
    let file = generation_to_file(&base, 1);
    let jh = JhBody {
        version: 2,
        block_size: 1024,
        base_address: 512,
        journal_created_ms: 0,
        file_created_ms: 0,
    };
    std::fs::write(&file, jh.encode(0)).unwrap();

    let err = JournalScanner::new(ScanConfig::new(&base)).scan(&mut Collector::default()).unwrap_err();
    assert!(matches!(kind_of(&err), Some(ErrorKind::CorruptJournal(_))), "{err:#}");
}
