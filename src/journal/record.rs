//! # Journal Record Bodies
//!
//! Typed encode/decode for each record's body. `encode` builds the complete
//! record (overhead, body, checksum); `decode` takes the body slice alone,
//! the scanner having already validated the overhead.
//!
//! PM and TM are variable-count records: a repeated fixed-width entry whose
//! count must satisfy `count * ENTRY_SIZE + OVERHEAD == record length`.

use eyre::{Result, ensure};

use crate::error::ErrorKind;
use crate::journal::{
    TYPE_CP, TYPE_DR, TYPE_DT, TYPE_IT, TYPE_IV, TYPE_JE, TYPE_JH, TYPE_PA, TYPE_PM, TYPE_SR,
    TYPE_TC, TYPE_TM, TYPE_TS, build_record,
};

pub const PM_ENTRY_SIZE: usize = 28;
pub const TM_ENTRY_SIZE: usize = 25;

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes(bytes[at..at + 2].try_into().unwrap())
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn be_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(bytes[at..at + 8].try_into().unwrap())
}

fn corrupt(what: &str, body_len: usize) -> eyre::Report {
    eyre::Report::new(ErrorKind::CorruptJournal(format!("{} (body length {})", what, body_len)))
}

/// Journal header: first record in every file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JhBody {
    pub version: u32,
    pub block_size: u64,
    pub base_address: u64,
    pub journal_created_ms: u64,
    pub file_created_ms: u64,
}

impl JhBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(36);
        body.extend_from_slice(&self.version.to_be_bytes());
        body.extend_from_slice(&self.block_size.to_be_bytes());
        body.extend_from_slice(&self.base_address.to_be_bytes());
        body.extend_from_slice(&self.journal_created_ms.to_be_bytes());
        body.extend_from_slice(&self.file_created_ms.to_be_bytes());
        build_record(TYPE_JH, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() == 36, corrupt("JH body must be 36 bytes", body.len()));
        Ok(Self {
            version: be_u32(body, 0),
            block_size: be_u64(body, 4),
            base_address: be_u64(body, 12),
            journal_created_ms: be_u64(body, 20),
            file_created_ms: be_u64(body, 28),
        })
    }
}

/// Journal end: logical end of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JeBody {
    pub base_address: u64,
    pub current_address: u64,
    pub journal_created_ms: u64,
}

impl JeBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(24);
        body.extend_from_slice(&self.base_address.to_be_bytes());
        body.extend_from_slice(&self.current_address.to_be_bytes());
        body.extend_from_slice(&self.journal_created_ms.to_be_bytes());
        build_record(TYPE_JE, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() == 24, corrupt("JE body must be 24 bytes", body.len()));
        Ok(Self {
            base_address: be_u64(body, 0),
            current_address: be_u64(body, 8),
            journal_created_ms: be_u64(body, 16),
        })
    }
}

/// Identify volume: binds a compact handle to a volume for the life of the
/// journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvBody {
    pub handle: u32,
    pub volume_id: u64,
    pub name: String,
}

impl IvBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(12 + self.name.len());
        body.extend_from_slice(&self.handle.to_be_bytes());
        body.extend_from_slice(&self.volume_id.to_be_bytes());
        body.extend_from_slice(self.name.as_bytes());
        build_record(TYPE_IV, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() >= 12, corrupt("IV body must be at least 12 bytes", body.len()));
        Ok(Self {
            handle: be_u32(body, 0),
            volume_id: be_u64(body, 4),
            name: String::from_utf8_lossy(&body[12..]).into_owned(),
        })
    }
}

/// Identify tree: binds a compact handle to a tree within a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItBody {
    pub handle: u32,
    pub volume_handle: u32,
    pub tree_name: String,
}

impl ItBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + self.tree_name.len());
        body.extend_from_slice(&self.handle.to_be_bytes());
        body.extend_from_slice(&self.volume_handle.to_be_bytes());
        body.extend_from_slice(self.tree_name.as_bytes());
        build_record(TYPE_IT, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() >= 8, corrupt("IT body must be at least 8 bytes", body.len()));
        Ok(Self {
            handle: be_u32(body, 0),
            volume_handle: be_u32(body, 4),
            tree_name: String::from_utf8_lossy(&body[8..]).into_owned(),
        })
    }
}

/// Page image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaBody {
    pub volume_handle: u32,
    pub page_address: u64,
    pub page: Vec<u8>,
}

impl PaBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(12 + self.page.len());
        body.extend_from_slice(&self.volume_handle.to_be_bytes());
        body.extend_from_slice(&self.page_address.to_be_bytes());
        body.extend_from_slice(&self.page);
        build_record(TYPE_PA, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() >= 12, corrupt("PA body must be at least 12 bytes", body.len()));
        Ok(Self {
            volume_handle: be_u32(body, 0),
            page_address: be_u64(body, 4),
            page: body[12..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmEntry {
    pub volume_handle: u32,
    pub page_address: u64,
    pub timestamp: u64,
    pub journal_address: u64,
}

/// Page map: where the newest image of each page lives in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PmBody {
    pub entries: Vec<PmEntry>,
}

impl PmBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.entries.len() * PM_ENTRY_SIZE);
        for entry in &self.entries {
            body.extend_from_slice(&entry.volume_handle.to_be_bytes());
            body.extend_from_slice(&entry.page_address.to_be_bytes());
            body.extend_from_slice(&entry.timestamp.to_be_bytes());
            body.extend_from_slice(&entry.journal_address.to_be_bytes());
        }
        build_record(TYPE_PM, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(
            body.len() % PM_ENTRY_SIZE == 0,
            corrupt("PM body is not a whole number of entries", body.len())
        );
        let entries = body
            .chunks_exact(PM_ENTRY_SIZE)
            .map(|chunk| PmEntry {
                volume_handle: be_u32(chunk, 0),
                page_address: be_u64(chunk, 4),
                timestamp: be_u64(chunk, 12),
                journal_address: be_u64(chunk, 20),
            })
            .collect();
        Ok(Self { entries })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TmEntry {
    pub start_timestamp: u64,
    pub commit_timestamp: u64,
    pub journal_address: u64,
    pub committed: bool,
}

/// Transaction map: in-flight transactions at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TmBody {
    pub entries: Vec<TmEntry>,
}

impl TmBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.entries.len() * TM_ENTRY_SIZE);
        for entry in &self.entries {
            body.extend_from_slice(&entry.start_timestamp.to_be_bytes());
            body.extend_from_slice(&entry.commit_timestamp.to_be_bytes());
            body.extend_from_slice(&entry.journal_address.to_be_bytes());
            body.push(entry.committed as u8);
        }
        build_record(TYPE_TM, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(
            body.len() % TM_ENTRY_SIZE == 0,
            corrupt("TM body is not a whole number of entries", body.len())
        );
        let entries = body
            .chunks_exact(TM_ENTRY_SIZE)
            .map(|chunk| TmEntry {
                start_timestamp: be_u64(chunk, 0),
                commit_timestamp: be_u64(chunk, 8),
                journal_address: be_u64(chunk, 16),
                committed: chunk[24] != 0,
            })
            .collect();
        Ok(Self { entries })
    }
}

/// Checkpoint: everything below `base_address` is durable in volume files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpBody {
    pub base_address: u64,
    pub system_time_ms: u64,
}

impl CpBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);
        body.extend_from_slice(&self.base_address.to_be_bytes());
        body.extend_from_slice(&self.system_time_ms.to_be_bytes());
        build_record(TYPE_CP, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() == 16, corrupt("CP body must be 16 bytes", body.len()));
        Ok(Self { base_address: be_u64(body, 0), system_time_ms: be_u64(body, 8) })
    }
}

/// Transaction start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsBody {
    pub start_timestamp: u64,
}

impl TsBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        build_record(TYPE_TS, timestamp, &self.start_timestamp.to_be_bytes())
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() == 8, corrupt("TS body must be 8 bytes", body.len()));
        Ok(Self { start_timestamp: be_u64(body, 0) })
    }
}

/// Transaction commit. No body; the overhead timestamp carries the commit
/// timestamp.
pub fn encode_tc(commit_timestamp: u64) -> Vec<u8> {
    build_record(TYPE_TC, commit_timestamp, &[])
}

/// Store record: a put of `key` to `value` in the identified tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrBody {
    pub tree_handle: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl SrBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(6 + self.key.len() + self.value.len());
        body.extend_from_slice(&self.tree_handle.to_be_bytes());
        body.extend_from_slice(&(self.key.len() as u16).to_be_bytes());
        body.extend_from_slice(&self.key);
        body.extend_from_slice(&self.value);
        build_record(TYPE_SR, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() >= 6, corrupt("SR body must be at least 6 bytes", body.len()));
        let key_size = be_u16(body, 4) as usize;
        ensure!(6 + key_size <= body.len(), corrupt("SR key overruns the record", body.len()));
        Ok(Self {
            tree_handle: be_u32(body, 0),
            key: body[6..6 + key_size].to_vec(),
            value: body[6 + key_size..].to_vec(),
        })
    }
}

/// Delete range: removes `[key1, key2)` from the identified tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrBody {
    pub tree_handle: u32,
    pub key1: Vec<u8>,
    pub key2: Vec<u8>,
}

impl DrBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(6 + self.key1.len() + self.key2.len());
        body.extend_from_slice(&self.tree_handle.to_be_bytes());
        body.extend_from_slice(&(self.key1.len() as u16).to_be_bytes());
        body.extend_from_slice(&self.key1);
        body.extend_from_slice(&self.key2);
        build_record(TYPE_DR, timestamp, &body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() >= 6, corrupt("DR body must be at least 6 bytes", body.len()));
        let key1_size = be_u16(body, 4) as usize;
        ensure!(6 + key1_size <= body.len(), corrupt("DR key1 overruns the record", body.len()));
        Ok(Self {
            tree_handle: be_u32(body, 0),
            key1: body[6..6 + key1_size].to_vec(),
            key2: body[6 + key1_size..].to_vec(),
        })
    }
}

/// Drop tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtBody {
    pub tree_handle: u32,
}

impl DtBody {
    pub fn encode(&self, timestamp: u64) -> Vec<u8> {
        build_record(TYPE_DT, timestamp, &self.tree_handle.to_be_bytes())
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        ensure!(body.len() == 4, corrupt("DT body must be 4 bytes", body.len()));
        Ok(Self { tree_handle: be_u32(body, 0) })
    }
}
