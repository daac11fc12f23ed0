//! # Journal Scanner
//!
//! Sequential scan of a journal file range, dispatching each record to a
//! visitor after applying type, page, and timestamp filters.
//!
//! ## End Handling
//!
//! Three distinct ends show up while scanning:
//!
//! - A valid JE record marks the logical end of a block; the scan rounds the
//!   current address up to the next block boundary and continues there.
//! - A short read at the physical end of a file means the producer crashed
//!   mid-record; the visitor's `eof` hook fires and the scan rounds up.
//! - A missing file is the end of the journal (EOJ); the scan terminates.
//!
//! A record whose length is below the overhead or at or above the block
//! size, an unknown type, or a checksum mismatch is `CorruptJournal` and
//! aborts the scan.
//!
//! The scanner adopts the block size declared by the first JH record it
//! reads and requires every later JH to agree; file-boundary arithmetic is
//! only sound when all files share one block size.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Result, WrapErr, bail, ensure};
use hashbrown::HashMap;
use tracing::debug;

use crate::config::{DEFAULT_BLOCK_SIZE, JOURNAL_OVERHEAD as OVERHEAD};
use crate::error::ErrorKind;
use crate::journal::record::{
    CpBody, DrBody, DtBody, ItBody, IvBody, JeBody, JhBody, PaBody, PmBody, SrBody, TmBody, TsBody,
};
use crate::journal::{
    RecordHeader, TYPE_CP, TYPE_DR, TYPE_DT, TYPE_IT, TYPE_IV, TYPE_JE, TYPE_JH, TYPE_PA, TYPE_PM,
    TYPE_SR, TYPE_TC, TYPE_TM, TYPE_TS, address_up, generation_to_file, is_valid_type,
    record_checksum, type_code, type_mnemonic,
};

/// Accepts `"*"` or comma-separated terms, each `n`, `n-m`, `-m`, or `n-`.
/// A value matches when any term includes it.
#[derive(Debug, Clone, Default)]
pub struct RangePredicate {
    terms: Vec<(Option<u64>, Option<u64>)>,
}

impl RangePredicate {
    pub fn all() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "*" {
            return Ok(Self::all());
        }
        let mut terms = Vec::new();
        for term in spec.split(',') {
            let parsed = Self::parse_term(term).ok_or_else(|| {
                eyre::Report::new(ErrorKind::InvalidArgument(format!(
                    "invalid term {:?} in range specification {:?}",
                    term, spec
                )))
            })?;
            terms.push(parsed);
        }
        Ok(Self { terms })
    }

    fn parse_term(term: &str) -> Option<(Option<u64>, Option<u64>)> {
        match term.split_once('-') {
            None => {
                let value = term.parse().ok()?;
                Some((Some(value), Some(value)))
            }
            Some((low, high)) => {
                let low = if low.is_empty() { None } else { Some(low.parse().ok()?) };
                let high = if high.is_empty() { None } else { Some(high.parse().ok()?) };
                if low.is_none() && high.is_none() {
                    return None;
                }
                Some((low, high))
            }
        }
    }

    pub fn is_selected(&self, value: u64) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        self.terms.iter().any(|(low, high)| {
            low.is_none_or(|l| l <= value) && high.is_none_or(|h| value <= h)
        })
    }
}

/// Which record types to dispatch.
#[derive(Debug, Clone)]
pub struct TypeFilter {
    selected: Vec<u16>,
    all: bool,
}

impl TypeFilter {
    pub fn all() -> Self {
        Self { selected: Vec::new(), all: true }
    }

    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "*" {
            return Ok(Self::all());
        }
        let mut selected = Vec::new();
        for name in spec.split(',') {
            let bytes = name.as_bytes();
            ensure!(
                bytes.len() == 2 && is_valid_type(type_code(&[bytes[0], bytes[1]])),
                ErrorKind::InvalidArgument(format!(
                    "the types parameter must be \"*\" or a comma-separated list of \
                     record type names; {:?} is not one",
                    name
                ))
            );
            selected.push(type_code(&[bytes[0], bytes[1]]));
        }
        Ok(Self { selected, all: false })
    }

    pub fn is_selected(&self, rtype: u16) -> bool {
        self.all || self.selected.contains(&rtype)
    }
}

impl Default for TypeFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Overhead facts handed to every visitor callback.
#[derive(Debug, Clone, Copy)]
pub struct RecordMeta {
    pub address: u64,
    pub timestamp: u64,
    pub size: u32,
}

/// One method per record type, plus the abnormal end-of-file hook. All
/// methods default to doing nothing.
#[allow(unused_variables)]
pub trait JournalVisitor {
    fn jh(&mut self, meta: &RecordMeta, body: &JhBody) -> Result<()> {
        Ok(())
    }
    fn je(&mut self, meta: &RecordMeta, body: &JeBody) -> Result<()> {
        Ok(())
    }
    fn iv(&mut self, meta: &RecordMeta, body: &IvBody) -> Result<()> {
        Ok(())
    }
    fn it(&mut self, meta: &RecordMeta, body: &ItBody) -> Result<()> {
        Ok(())
    }
    fn pa(&mut self, meta: &RecordMeta, body: &PaBody) -> Result<()> {
        Ok(())
    }
    fn pm(&mut self, meta: &RecordMeta, body: &PmBody) -> Result<()> {
        Ok(())
    }
    fn tm(&mut self, meta: &RecordMeta, body: &TmBody) -> Result<()> {
        Ok(())
    }
    fn cp(&mut self, meta: &RecordMeta, body: &CpBody) -> Result<()> {
        Ok(())
    }
    fn ts(&mut self, meta: &RecordMeta, body: &TsBody) -> Result<()> {
        Ok(())
    }
    fn tc(&mut self, meta: &RecordMeta) -> Result<()> {
        Ok(())
    }
    fn sr(&mut self, meta: &RecordMeta, body: &SrBody) -> Result<()> {
        Ok(())
    }
    fn dr(&mut self, meta: &RecordMeta, body: &DrBody) -> Result<()> {
        Ok(())
    }
    fn dt(&mut self, meta: &RecordMeta, body: &DtBody) -> Result<()> {
        Ok(())
    }
    fn eof(&mut self, address: u64) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Path prefix; files are `<base>.NNNNNNNNNNNN`.
    pub base: PathBuf,
    pub start: u64,
    pub end: u64,
    pub types: TypeFilter,
    pub pages: RangePredicate,
    pub timestamps: RangePredicate,
}

impl ScanConfig {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            start: 0,
            end: u64::MAX / 2,
            types: TypeFilter::all(),
            pages: RangePredicate::all(),
            timestamps: RangePredicate::all(),
        }
    }
}

enum Step {
    Continue,
    EndOfBlock,
    EndOfJournal,
}

enum ReadOutcome {
    Bytes(Vec<u8>),
    Short,
    Missing,
}

pub struct JournalScanner {
    config: ScanConfig,
    block_size: u64,
    declared_block_size: Option<u64>,
    files: HashMap<u64, File>,
    current: u64,
    should_stop: Arc<AtomicBool>,
    records_visited: u64,
}

impl JournalScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            block_size: DEFAULT_BLOCK_SIZE,
            declared_block_size: None,
            files: HashMap::new(),
            current: 0,
            should_stop: Arc::new(AtomicBool::new(false)),
            records_visited: 0,
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_stop)
    }

    pub fn records_visited(&self) -> u64 {
        self.records_visited
    }

    /// Scan `[start, end)` sequentially, dispatching selected records.
    pub fn scan(&mut self, visitor: &mut dyn JournalVisitor) -> Result<u64> {
        self.current = self.config.start;
        while self.current < self.config.end {
            if self.should_stop.load(Ordering::Relaxed) {
                debug!(address = self.current, "journal scan cancelled");
                break;
            }
            match self.scan_one(visitor)? {
                Step::Continue => {}
                Step::EndOfBlock => self.current = address_up(self.current, self.block_size),
                Step::EndOfJournal => break,
            }
        }
        Ok(self.records_visited)
    }

    fn scan_one(&mut self, visitor: &mut dyn JournalVisitor) -> Result<Step> {
        let from = self.current;
        let header_bytes = match self.read_at(from, OVERHEAD)? {
            ReadOutcome::Bytes(bytes) => bytes,
            ReadOutcome::Short => {
                visitor.eof(from)?;
                return Ok(Step::EndOfBlock);
            }
            ReadOutcome::Missing => return Ok(Step::EndOfJournal),
        };
        let header = RecordHeader::decode(&header_bytes)?;

        if (header.length as usize) < OVERHEAD || header.length as u64 >= self.block_size {
            bail!(ErrorKind::CorruptJournal(format!(
                "bad record length {} at address {}",
                header.length, from
            )));
        }
        if !is_valid_type(header.rtype) {
            bail!(ErrorKind::CorruptJournal(format!(
                "invalid record type {:#06x} at address {}",
                header.rtype, from
            )));
        }

        let record = match self.read_at(from, header.length as usize)? {
            ReadOutcome::Bytes(bytes) => bytes,
            ReadOutcome::Short => {
                // The producer crashed mid-record.
                visitor.eof(from)?;
                return Ok(Step::EndOfBlock);
            }
            ReadOutcome::Missing => return Ok(Step::EndOfJournal),
        };
        if record_checksum(&record) != header.checksum {
            bail!(ErrorKind::CorruptJournal(format!(
                "checksum mismatch for {} record at address {}",
                type_mnemonic(header.rtype),
                from
            )));
        }

        if header.rtype == TYPE_JH {
            let jh = JhBody::decode(&record[OVERHEAD..])?;
            match self.declared_block_size {
                None => {
                    self.declared_block_size = Some(jh.block_size);
                    self.block_size = jh.block_size;
                }
                Some(declared) => {
                    ensure!(
                        declared == jh.block_size,
                        ErrorKind::CorruptJournal(format!(
                            "JH at address {} declares block size {} but the journal \
                             started with {}",
                            from, jh.block_size, declared
                        ))
                    );
                }
            }
        }

        self.dispatch(visitor, &header, from, &record)?;
        self.current = from + header.length as u64;
        Ok(if header.rtype == TYPE_JE { Step::EndOfBlock } else { Step::Continue })
    }

    fn dispatch(
        &mut self,
        visitor: &mut dyn JournalVisitor,
        header: &RecordHeader,
        address: u64,
        record: &[u8],
    ) -> Result<()> {
        if !self.config.types.is_selected(header.rtype) {
            return Ok(());
        }
        let meta = RecordMeta { address, timestamp: header.timestamp, size: header.length };
        let body = &record[OVERHEAD..];
        let by_timestamp = self.config.timestamps.is_selected(header.timestamp);

        match header.rtype {
            TYPE_JH => visitor.jh(&meta, &JhBody::decode(body)?)?,
            TYPE_JE => visitor.je(&meta, &JeBody::decode(body)?)?,
            TYPE_IV => visitor.iv(&meta, &IvBody::decode(body)?)?,
            TYPE_IT => visitor.it(&meta, &ItBody::decode(body)?)?,
            TYPE_PM => visitor.pm(&meta, &PmBody::decode(body)?)?,
            TYPE_TM => visitor.tm(&meta, &TmBody::decode(body)?)?,
            TYPE_PA => {
                let body = PaBody::decode(body)?;
                if !by_timestamp || !self.config.pages.is_selected(body.page_address) {
                    return Ok(());
                }
                visitor.pa(&meta, &body)?;
            }
            TYPE_CP if by_timestamp => visitor.cp(&meta, &CpBody::decode(body)?)?,
            TYPE_TS if by_timestamp => visitor.ts(&meta, &TsBody::decode(body)?)?,
            TYPE_TC if by_timestamp => visitor.tc(&meta)?,
            TYPE_SR if by_timestamp => visitor.sr(&meta, &SrBody::decode(body)?)?,
            TYPE_DR if by_timestamp => visitor.dr(&meta, &DrBody::decode(body)?)?,
            TYPE_DT if by_timestamp => visitor.dt(&meta, &DtBody::decode(body)?)?,
            _ => return Ok(()),
        }
        self.records_visited += 1;
        Ok(())
    }

    /// Read exactly `size` bytes at `address`. Records never span blocks by
    /// construction, so a read that would cross the boundary is reported the
    /// same way as a short read and the caller rounds up.
    fn read_at(&mut self, address: u64, size: usize) -> Result<ReadOutcome> {
        if address % self.block_size + size as u64 > self.block_size {
            return Ok(ReadOutcome::Short);
        }
        let generation = address / self.block_size;
        if !self.files.contains_key(&generation) {
            let path = generation_to_file(&self.config.base, generation);
            match File::open(&path) {
                Ok(file) => {
                    self.files.insert(generation, file);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(ReadOutcome::Missing);
                }
                Err(e) => {
                    return Err(eyre::Report::new(ErrorKind::Io(e.to_string())))
                        .wrap_err_with(|| format!("failed to open journal file {:?}", path));
                }
            }
        }
        let file = self.files.get_mut(&generation).expect("file cached above");
        file.seek(SeekFrom::Start(address % self.block_size))
            .wrap_err("failed to seek in journal file")?;
        let mut out = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = file.read(&mut out[filled..]).wrap_err("failed to read journal file")?;
            if n == 0 {
                return Ok(ReadOutcome::Short);
            }
            filled += n;
        }
        Ok(ReadOutcome::Bytes(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_predicate_star_matches_everything() {
        let predicate = RangePredicate::parse("*").unwrap();
        assert!(predicate.is_selected(0));
        assert!(predicate.is_selected(u64::MAX));
    }

    #[test]
    fn range_predicate_terms() {
        let predicate = RangePredicate::parse("0,1,200-299,33333-").unwrap();
        assert!(predicate.is_selected(0));
        assert!(predicate.is_selected(1));
        assert!(!predicate.is_selected(2));
        assert!(predicate.is_selected(200));
        assert!(predicate.is_selected(250));
        assert!(predicate.is_selected(299));
        assert!(!predicate.is_selected(300));
        assert!(predicate.is_selected(33333));
        assert!(predicate.is_selected(u64::MAX));
    }

    #[test]
    fn range_predicate_open_low_end() {
        let predicate = RangePredicate::parse("-100").unwrap();
        assert!(predicate.is_selected(0));
        assert!(predicate.is_selected(100));
        assert!(!predicate.is_selected(101));
    }

    #[test]
    fn range_predicate_rejects_garbage() {
        assert!(RangePredicate::parse("abc").is_err());
        assert!(RangePredicate::parse("1--2").is_err());
        assert!(RangePredicate::parse("-").is_err());
    }

    #[test]
    fn type_filter_parses_lists() {
        let filter = TypeFilter::parse("TS,SR,TC").unwrap();
        assert!(filter.is_selected(TYPE_TS));
        assert!(filter.is_selected(TYPE_SR));
        assert!(filter.is_selected(TYPE_TC));
        assert!(!filter.is_selected(TYPE_PA));
        assert!(TypeFilter::parse("XX").is_err());
        assert!(TypeFilter::parse("T").is_err());
    }
}
