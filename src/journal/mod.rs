//! # Append-Only Journal
//!
//! The journal records every page image, transactional mutation, and
//! structural event in a typed record stream that a recovery pass can
//! replay. It is a sequence of fixed-size blocks, each stored as one file
//! named `<base>.NNNNNNNNNNNN` (twelve zero-padded decimal digits of the
//! block's generation). A journal address is a 64-bit logical offset that
//! spans blocks: `generation = address / block_size`, in-file offset is
//! `address % block_size`.
//!
//! ## Record Format
//!
//! Every record starts with a fixed 16-byte overhead:
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  -------------------------------------
//! 0       2     type       Two ASCII letters, e.g. "PA"
//! 2       4     length     Overhead + body, big-endian
//! 6       8     timestamp  Engine timestamp, big-endian
//! 14      2     checksum   CRC-16/IBM-3740, big-endian
//! ```
//!
//! The checksum covers the whole record image with the checksum field
//! zeroed. All integers anywhere in the journal are big-endian.
//!
//! ## Record Types
//!
//! | Type | Meaning            | Type | Meaning              |
//! |------|--------------------|------|----------------------|
//! | JH   | journal header     | CP   | checkpoint           |
//! | JE   | journal end        | TS   | transaction start    |
//! | IV   | identify volume    | TC   | transaction commit   |
//! | IT   | identify tree      | SR   | store record         |
//! | PA   | page image         | DR   | delete range         |
//! | PM   | page map           | DT   | drop tree            |
//! | TM   | transaction map    |      |                      |
//!
//! Every file begins with a JH record; the logical end of a block is either
//! a JE record or a hard end of file left by a crashed producer. An address
//! without room for a complete record rounds up to the next block boundary.

pub mod dump;
pub mod record;
pub mod scanner;
pub mod writer;

pub use dump::DumpWriter;
pub use record::{
    CpBody, DrBody, DtBody, ItBody, IvBody, JeBody, JhBody, PaBody, PmBody, PmEntry, SrBody,
    TmBody, TmEntry, TsBody,
};
pub use scanner::{JournalScanner, JournalVisitor, RangePredicate, RecordMeta, ScanConfig, TypeFilter};
pub use writer::JournalWriter;

use std::path::{Path, PathBuf};

use crc::{CRC_16_IBM_3740, Crc};
use eyre::{Result, ensure};

pub use crate::config::DEFAULT_BLOCK_SIZE;
use crate::config::{JOURNAL_GENERATION_DIGITS, JOURNAL_OVERHEAD as OVERHEAD};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Format version written into JH records.
pub const JOURNAL_VERSION: u32 = 2;

/// A record type as a packed pair of ASCII bytes.
pub type RecordType = u16;

pub const fn type_code(mnemonic: &[u8; 2]) -> RecordType {
    ((mnemonic[0] as u16) << 8) | mnemonic[1] as u16
}

pub const TYPE_JH: RecordType = type_code(b"JH");
pub const TYPE_JE: RecordType = type_code(b"JE");
pub const TYPE_IV: RecordType = type_code(b"IV");
pub const TYPE_IT: RecordType = type_code(b"IT");
pub const TYPE_PA: RecordType = type_code(b"PA");
pub const TYPE_PM: RecordType = type_code(b"PM");
pub const TYPE_TM: RecordType = type_code(b"TM");
pub const TYPE_CP: RecordType = type_code(b"CP");
pub const TYPE_TS: RecordType = type_code(b"TS");
pub const TYPE_TC: RecordType = type_code(b"TC");
pub const TYPE_SR: RecordType = type_code(b"SR");
pub const TYPE_DR: RecordType = type_code(b"DR");
pub const TYPE_DT: RecordType = type_code(b"DT");

pub const ALL_TYPES: [RecordType; 13] = [
    TYPE_JH, TYPE_JE, TYPE_IV, TYPE_IT, TYPE_PA, TYPE_PM, TYPE_TM, TYPE_CP, TYPE_TS, TYPE_TC,
    TYPE_SR, TYPE_DR, TYPE_DT,
];

pub fn is_valid_type(rtype: RecordType) -> bool {
    ALL_TYPES.contains(&rtype)
}

pub fn type_mnemonic(rtype: RecordType) -> String {
    let bytes = [(rtype >> 8) as u8, rtype as u8];
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Name of the file holding `generation`.
pub fn generation_to_file(base: &Path, generation: u64) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{:0width$}", generation, width = JOURNAL_GENERATION_DIGITS));
    PathBuf::from(name)
}

/// Parse the generation out of a journal file name, if it has one.
pub fn file_to_generation(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let (_, suffix) = name.rsplit_once('.')?;
    if suffix.len() != JOURNAL_GENERATION_DIGITS || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Round an address up to the start of the next block.
pub fn address_up(address: u64, block_size: u64) -> u64 {
    (address / block_size + 1) * block_size
}

/// CRC-16 of a record image, with the checksum field treated as zero.
pub fn record_checksum(record: &[u8]) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(&record[..14]);
    digest.update(&[0, 0]);
    if record.len() > OVERHEAD {
        digest.update(&record[OVERHEAD..]);
    }
    digest.finalize()
}

/// Decoded record overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub rtype: RecordType,
    pub length: u32,
    pub timestamp: u64,
    pub checksum: u16,
}

impl RecordHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() >= OVERHEAD, "record overhead needs {} bytes", OVERHEAD);
        Ok(Self {
            rtype: u16::from_be_bytes(bytes[0..2].try_into().unwrap()),
            length: u32::from_be_bytes(bytes[2..6].try_into().unwrap()),
            timestamp: u64::from_be_bytes(bytes[6..14].try_into().unwrap()),
            checksum: u16::from_be_bytes(bytes[14..16].try_into().unwrap()),
        })
    }
}

/// Assemble a complete record: overhead, body, checksum.
pub fn build_record(rtype: RecordType, timestamp: u64, body: &[u8]) -> Vec<u8> {
    let length = (OVERHEAD + body.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&rtype.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(body);
    let checksum = record_checksum(&out);
    out[14..16].copy_from_slice(&checksum.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_are_ascii_pairs() {
        assert_eq!(type_mnemonic(TYPE_JH), "JH");
        assert_eq!(type_mnemonic(TYPE_PA), "PA");
        assert!(is_valid_type(TYPE_TC));
        assert!(!is_valid_type(type_code(b"ZZ")));
    }

    #[test]
    fn generation_file_names_are_zero_padded() {
        let base = Path::new("/tmp/journal/j");
        let path = generation_to_file(base, 1234);
        assert_eq!(path.to_str().unwrap(), "/tmp/journal/j.000000001234");
        assert_eq!(file_to_generation(&path), Some(1234));
    }

    #[test]
    fn non_journal_names_have_no_generation() {
        assert_eq!(file_to_generation(Path::new("j.12")), None);
        assert_eq!(file_to_generation(Path::new("j.00000000123x")), None);
        assert_eq!(file_to_generation(Path::new("plain")), None);
    }

    #[test]
    fn address_up_rounds_to_next_block() {
        assert_eq!(address_up(0, 1000), 1000);
        assert_eq!(address_up(999, 1000), 1000);
        assert_eq!(address_up(1000, 1000), 2000);
    }

    #[test]
    fn built_records_carry_a_valid_checksum() {
        let record = build_record(TYPE_TS, 42, &7u64.to_be_bytes());
        let header = RecordHeader::decode(&record).unwrap();
        assert_eq!(header.rtype, TYPE_TS);
        assert_eq!(header.length as usize, record.len());
        assert_eq!(header.timestamp, 42);
        assert_eq!(header.checksum, record_checksum(&record));
    }

    #[test]
    fn checksum_detects_body_corruption() {
        let mut record = build_record(TYPE_SR, 1, b"some body");
        let original = record_checksum(&record);
        record[OVERHEAD] ^= 0xFF;
        assert_ne!(record_checksum(&record), original);
    }
}
