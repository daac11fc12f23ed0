//! # Journal Writer
//!
//! A minimal append-only producer: opens `<base>.NNNNNNNNNNNN` files, writes
//! a JH record at the start of each, appends records sequentially, and
//! rounds the address up to the next block when a record would not fit.
//! The full recovery-oriented producer (page maps, checkpoint scheduling,
//! copy-back) belongs to the buffer-pool collaborator; this writer covers
//! what the tools and the tests need to produce valid journals.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use eyre::{Result, WrapErr, ensure};

use crate::config::JOURNAL_OVERHEAD as OVERHEAD;
use crate::error::ErrorKind;
use crate::journal::record::JhBody;
use crate::journal::{JOURNAL_VERSION, address_up, generation_to_file};

pub struct JournalWriter {
    base: PathBuf,
    block_size: u64,
    journal_created_ms: u64,
    current_address: u64,
    file: Option<File>,
}

impl JournalWriter {
    pub fn create(base: impl Into<PathBuf>, block_size: u64) -> Result<Self> {
        ensure!(
            block_size > OVERHEAD as u64,
            ErrorKind::InvalidArgument(format!("block size {} is too small", block_size))
        );
        Ok(Self {
            base: base.into(),
            block_size,
            journal_created_ms: now_ms(),
            current_address: 0,
            file: None,
        })
    }

    pub fn current_address(&self) -> u64 {
        self.current_address
    }

    /// Append one complete record (as produced by the record encoders),
    /// returning the address it was written at.
    pub fn append(&mut self, record: &[u8], timestamp: u64) -> Result<u64> {
        ensure!(
            (record.len() as u64) < self.block_size,
            ErrorKind::InvalidArgument(format!(
                "record of {} bytes cannot fit a block of {}",
                record.len(),
                self.block_size
            ))
        );
        if self.current_address % self.block_size + record.len() as u64 > self.block_size {
            self.current_address = address_up(self.current_address, self.block_size);
            self.file = None;
        }
        if self.file.is_none() {
            self.open_block(timestamp)?;
        }
        let address = self.current_address;
        self.file
            .as_mut()
            .expect("block opened above")
            .write_all(record)
            .wrap_err("failed to append journal record")?;
        self.current_address += record.len() as u64;
        Ok(address)
    }

    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync_all().wrap_err("failed to sync journal file")?;
        }
        Ok(())
    }

    fn open_block(&mut self, timestamp: u64) -> Result<()> {
        let generation = self.current_address / self.block_size;
        let path = generation_to_file(&self.base, generation);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create journal file {:?}", path))?;
        self.file = Some(file);

        debug_assert_eq!(self.current_address % self.block_size, 0);
        let jh = JhBody {
            version: JOURNAL_VERSION,
            block_size: self.block_size,
            base_address: self.current_address,
            journal_created_ms: self.journal_created_ms,
            file_created_ms: now_ms(),
        };
        let record = jh.encode(timestamp);
        self.file
            .as_mut()
            .expect("file opened above")
            .write_all(&record)
            .wrap_err("failed to write journal header")?;
        self.current_address += record.len() as u64;
        Ok(())
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}
