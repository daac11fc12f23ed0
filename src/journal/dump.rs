//! # Journal Dump
//!
//! A [`JournalVisitor`] that renders one line per record, the output format
//! of the journal-view tool:
//!
//! ```text
//!            address       timestamp TY (    size) type-specific fields
//! ```
//!
//! Keys and values are truncated to configurable display lengths with a
//! trailing ellipsis. With `verbose` set, PM and TM records expand their
//! entry lists one entry per line, applying the page and timestamp filters
//! per entry.

use std::io::Write;

use eyre::{Result, WrapErr};

use crate::encoding::key::decode_text;
use crate::journal::record::{
    CpBody, DrBody, DtBody, ItBody, IvBody, JeBody, JhBody, PaBody, PmBody, SrBody, TmBody, TsBody,
};
use crate::journal::scanner::{JournalVisitor, RangePredicate, RecordMeta};
use crate::page::long_record::{LongRecord, is_long_record};
use crate::page::{PageHeader, PageType};

const ELLIPSIS: &str = "...";

pub struct DumpWriter<W: Write> {
    out: W,
    max_key: usize,
    max_value: usize,
    verbose: bool,
    pages: RangePredicate,
    timestamps: RangePredicate,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W, max_key: usize, max_value: usize, verbose: bool) -> Self {
        Self {
            out,
            max_key: max_key.max(ELLIPSIS.len() + 1),
            max_value: max_value.max(ELLIPSIS.len() + 1),
            verbose,
            pages: RangePredicate::all(),
            timestamps: RangePredicate::all(),
        }
    }

    /// Filters applied per entry when expanding PM and TM records.
    pub fn with_entry_filters(mut self, pages: RangePredicate, timestamps: RangePredicate) -> Self {
        self.pages = pages;
        self.timestamps = timestamps;
        self
    }

    fn start(&self, meta: &RecordMeta, mnemonic: &str) -> String {
        format!("{:>18}{:>16} {} ({:>8}) ", meta.address, meta.timestamp, mnemonic, meta.size)
    }

    fn finish(&mut self, line: String) -> Result<()> {
        writeln!(self.out, "{}", line).wrap_err("failed to write dump line")
    }

    fn clipped(&self, text: &str, width: usize) -> String {
        if text.chars().count() <= width {
            format!("{:<width$}", text, width = width)
        } else {
            let head: String = text.chars().take(width - ELLIPSIS.len()).collect();
            format!("{}{}", head, ELLIPSIS)
        }
    }

    fn key_text(&self, key: &[u8]) -> String {
        let display = decode_text(key)
            .map(|s| format!("{:?}", s))
            .unwrap_or_else(|_| hex(key));
        self.clipped(&display, self.max_key)
    }

    fn value_text(&self, value: &[u8]) -> String {
        if is_long_record(value) {
            if let Ok(descriptor) = LongRecord::decode(value) {
                return self.clipped(
                    &format!("LONG_REC size {} page {}", descriptor.total_size, descriptor.first_page),
                    self.max_value,
                );
            }
        }
        let display = match std::str::from_utf8(value) {
            Ok(text) => format!("{:?}", text),
            Err(_) => hex(value),
        };
        self.clipped(&display, self.max_value)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

impl<W: Write> JournalVisitor for DumpWriter<W> {
    fn jh(&mut self, meta: &RecordMeta, body: &JhBody) -> Result<()> {
        let line = self.start(meta, "JH")
            + &format!(
                " version {} blockSize {} baseAddress {} journalCreated {} fileCreated {}",
                body.version,
                body.block_size,
                body.base_address,
                body.journal_created_ms,
                body.file_created_ms
            );
        self.finish(line)
    }

    fn je(&mut self, meta: &RecordMeta, body: &JeBody) -> Result<()> {
        let line = self.start(meta, "JE")
            + &format!(
                " baseAddress {} currentAddress {} journalCreated {}",
                body.base_address, body.current_address, body.journal_created_ms
            );
        self.finish(line)
    }

    fn iv(&mut self, meta: &RecordMeta, body: &IvBody) -> Result<()> {
        let line = self.start(meta, "IV")
            + &format!(" handle {:05} id {} name {}", body.handle, body.volume_id, body.name);
        self.finish(line)
    }

    fn it(&mut self, meta: &RecordMeta, body: &ItBody) -> Result<()> {
        let line = self.start(meta, "IT")
            + &format!(
                " handle {:05} volume {:05} treeName {}",
                body.handle, body.volume_handle, body.tree_name
            );
        self.finish(line)
    }

    fn pa(&mut self, meta: &RecordMeta, body: &PaBody) -> Result<()> {
        let (type_name, right) = match PageHeader::from_bytes(&body.page) {
            Ok(header) => (header.page_type().to_string(), header.right_sibling()),
            Err(_) => (PageType::Invalid(0).to_string(), 0),
        };
        let line = self.start(meta, "PA")
            + &format!(
                " page {}:{} type {:>10} right {}",
                body.volume_handle, body.page_address, type_name, right
            );
        self.finish(line)
    }

    fn pm(&mut self, meta: &RecordMeta, body: &PmBody) -> Result<()> {
        let line = self.start(meta, "PM") + &format!(" entries {}", body.entries.len());
        self.finish(line)?;
        if self.verbose {
            for entry in &body.entries {
                if self.pages.is_selected(entry.page_address)
                    && self.timestamps.is_selected(entry.timestamp)
                {
                    let line = format!(
                        "-- {}:{}: @{}({})",
                        entry.volume_handle, entry.page_address, entry.journal_address, entry.timestamp
                    );
                    self.finish(line)?;
                }
            }
        }
        Ok(())
    }

    fn tm(&mut self, meta: &RecordMeta, body: &TmBody) -> Result<()> {
        let line = self.start(meta, "TM") + &format!(" entries {}", body.entries.len());
        self.finish(line)?;
        if self.verbose {
            for entry in &body.entries {
                let line = format!(
                    "-- commit {} start {} @{} {}",
                    entry.commit_timestamp,
                    entry.start_timestamp,
                    entry.journal_address,
                    if entry.committed { "committed" } else { "uncommitted" }
                );
                self.finish(line)?;
            }
        }
        Ok(())
    }

    fn cp(&mut self, meta: &RecordMeta, body: &CpBody) -> Result<()> {
        let line = self.start(meta, "CP")
            + &format!(" baseAddress {} at {}", body.base_address, body.system_time_ms);
        self.finish(line)
    }

    fn ts(&mut self, meta: &RecordMeta, body: &TsBody) -> Result<()> {
        let line = self.start(meta, "TS") + &format!(" startTimestamp {}", body.start_timestamp);
        self.finish(line)
    }

    fn tc(&mut self, meta: &RecordMeta) -> Result<()> {
        let line = self.start(meta, "TC");
        self.finish(line)
    }

    fn sr(&mut self, meta: &RecordMeta, body: &SrBody) -> Result<()> {
        let line = self.start(meta, "SR")
            + &format!(
                " tree {:05} keySize {} valueSize {}  {} : {}",
                body.tree_handle,
                body.key.len(),
                body.value.len(),
                self.key_text(&body.key),
                self.value_text(&body.value)
            );
        self.finish(line)
    }

    fn dr(&mut self, meta: &RecordMeta, body: &DrBody) -> Result<()> {
        let line = self.start(meta, "DR")
            + &format!(
                " tree {:05} key1Size {} key2Size {}  {}->{}",
                body.tree_handle,
                body.key1.len(),
                body.key2.len(),
                self.key_text(&body.key1),
                self.key_text(&body.key2)
            );
        self.finish(line)
    }

    fn dt(&mut self, meta: &RecordMeta, body: &DtBody) -> Result<()> {
        let line = self.start(meta, "DT") + &format!(" tree {:05}", body.tree_handle);
        self.finish(line)
    }

    fn eof(&mut self, address: u64) -> Result<()> {
        let meta = RecordMeta { address, timestamp: 0, size: 0 };
        let line = self.start(&meta, "~~");
        self.finish(line)
    }
}
