//! # Page Types and Header Layout
//!
//! Every page in a volume begins with a fixed 32-byte header followed by a
//! type-specific body. The header is shared by all page types; the body views
//! in this module's submodules fail loudly when asked to interpret the wrong
//! type.
//!
//! ## Page Header Layout (32 bytes)
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  ----------------------------------------
//! 0       8     page_address   Address of this page within the volume
//! 8       8     right_sibling  Next page at the same tree level (0 = end)
//! 16      8     timestamp      Timestamp of the last modification
//! 24      1     page_type      Head, Garbage, Data, Index(level), LongRecord
//! 25      1     (reserved)
//! 26      2     alloc          Low-water mark of the tail region
//! 28      2     keyblock_end   High-water mark of the keyblock region
//! 30      2     (reserved)
//! ```
//!
//! ## Keyed Page Body (Data and Index pages)
//!
//! ```text
//! +----------------------+
//! | Header (32 bytes)    |
//! +----------------------+  <- KEY_BLOCK_START
//! | Keyblocks (4B each)  |     grows upward to keyblock_end
//! +----------------------+  <- keyblock_end
//! | Free space           |
//! +----------------------+  <- alloc
//! | Tail blocks          |     allocated downward from the page end
//! +----------------------+  <- page size
//! ```
//!
//! Keyblocks are sorted by full key ascending. Only the first holds a full
//! key; each subsequent keyblock elides the prefix it shares with its
//! predecessor (see [`keyblock`]).
//!
//! ## Other Bodies
//!
//! - **Head** (page 0): volume metadata, see the volume module.
//! - **Garbage**: a dense array of `{left_page, right_page}` free-run entries
//!   occupying `[alloc, page_size)`, see [`garbage`].
//! - **LongRecord**: raw value bytes chained through `right_sibling`.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` is a `zerocopy` struct read in place from page buffers. Body
//! views borrow the page bytes; nothing is deserialized up front.

pub mod codec;
pub mod garbage;
pub mod keyblock;
pub mod long_record;
pub mod verify;

pub use codec::{FindResult, InsertOutcome, KeyedPage, KeyedPageMut};
pub use garbage::{GarbageEntry, GarbagePage, GarbagePageMut};
pub use keyblock::Keyblock;
pub use long_record::LongRecord;
pub use verify::{PageFault, VerifyVisitor};

use eyre::{Result, ensure};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{MAX_PAGE_SIZE, MAX_TREE_DEPTH, MIN_PAGE_SIZE, PAGE_HEADER_SIZE};

/// Discriminant values for [`PageType`]. Index levels occupy a contiguous
/// range above `DATA`, so `page_type == DATA + level` holds for every tree
/// level and the verifier can check placement with plain arithmetic.
pub const TYPE_UNUSED: u8 = 0;
pub const TYPE_HEAD: u8 = 1;
pub const TYPE_GARBAGE: u8 = 2;
pub const TYPE_DATA: u8 = 3;
pub const TYPE_INDEX_MIN: u8 = TYPE_DATA + 1;
pub const TYPE_INDEX_MAX: u8 = TYPE_DATA + (MAX_TREE_DEPTH as u8 - 1);
pub const TYPE_LONG_RECORD: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unused,
    Head,
    Garbage,
    Data,
    /// An index page at the given tree level (1-based; leaves are level 0).
    Index(u8),
    LongRecord,
    Invalid(u8),
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            TYPE_UNUSED => PageType::Unused,
            TYPE_HEAD => PageType::Head,
            TYPE_GARBAGE => PageType::Garbage,
            TYPE_DATA => PageType::Data,
            TYPE_INDEX_MIN..=TYPE_INDEX_MAX => PageType::Index(b - TYPE_DATA),
            TYPE_LONG_RECORD => PageType::LongRecord,
            other => PageType::Invalid(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PageType::Unused => TYPE_UNUSED,
            PageType::Head => TYPE_HEAD,
            PageType::Garbage => TYPE_GARBAGE,
            PageType::Data => TYPE_DATA,
            PageType::Index(level) => TYPE_DATA + level,
            PageType::LongRecord => TYPE_LONG_RECORD,
            PageType::Invalid(b) => b,
        }
    }

    /// The page type expected at `level` of a tree descent.
    pub fn for_level(level: usize) -> Self {
        if level == 0 { PageType::Data } else { PageType::Index(level as u8) }
    }

    pub fn is_keyed(self) -> bool {
        matches!(self, PageType::Data | PageType::Index(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            PageType::Unused => "Unused",
            PageType::Head => "Head",
            PageType::Garbage => "Garbage",
            PageType::Data => "Data",
            PageType::Index(_) => "Index",
            PageType::LongRecord => "LongRec",
            PageType::Invalid(_) => "Invalid",
        }
    }
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageType::Index(level) => write!(f, "Index{}", level),
            PageType::Invalid(b) => write!(f, "Invalid({})", b),
            other => f.write_str(other.name()),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageHeader {
    page_address: u64,
    right_sibling: u64,
    timestamp: u64,
    page_type: u8,
    _reserved: u8,
    alloc: u16,
    keyblock_end: u16,
    _reserved2: [u8; 2],
}

impl PageHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn page_address(&self) -> u64 {
        self.page_address
    }

    pub fn set_page_address(&mut self, address: u64) {
        self.page_address = address;
    }

    pub fn right_sibling(&self) -> u64 {
        self.right_sibling
    }

    pub fn set_right_sibling(&mut self, address: u64) {
        self.right_sibling = address;
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type.to_byte();
    }

    pub fn alloc(&self) -> usize {
        self.alloc as usize
    }

    pub fn set_alloc(&mut self, alloc: usize) {
        self.alloc = alloc as u16;
    }

    pub fn keyblock_end(&self) -> usize {
        self.keyblock_end as usize
    }

    pub fn set_keyblock_end(&mut self, end: usize) {
        self.keyblock_end = end as u16;
    }
}

const _: () = assert!(size_of::<PageHeader>() == PAGE_HEADER_SIZE);

/// Check that `size` is a supported page size.
pub fn validate_page_size(size: usize) -> Result<()> {
    ensure!(
        size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size),
        crate::error::ErrorKind::InvalidArgument(format!(
            "unsupported page size {} (must be a power of two in [{}, {}])",
            size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
        ))
    );
    Ok(())
}

/// Initialize `data` as an empty page of the given type. For keyed pages the
/// keyblock region starts empty and the tail region spans nothing.
pub fn init_page(data: &mut [u8], page_type: PageType, page_address: u64, timestamp: u64) -> Result<()> {
    validate_page_size(data.len())?;
    let page_size = data.len();
    data.fill(0);
    let header = PageHeader::from_bytes_mut(data)?;
    header.set_page_address(page_address);
    header.set_page_type(page_type);
    header.set_timestamp(timestamp);
    header.set_alloc(page_size);
    header.set_keyblock_end(PAGE_HEADER_SIZE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_32_bytes() {
        assert_eq!(size_of::<PageHeader>(), 32);
    }

    #[test]
    fn page_type_round_trips_through_bytes() {
        for t in [
            PageType::Unused,
            PageType::Head,
            PageType::Garbage,
            PageType::Data,
            PageType::Index(1),
            PageType::Index(19),
            PageType::LongRecord,
        ] {
            assert_eq!(PageType::from_byte(t.to_byte()), t);
        }
    }

    #[test]
    fn index_levels_follow_data() {
        assert_eq!(PageType::for_level(0), PageType::Data);
        assert_eq!(PageType::for_level(3), PageType::Index(3));
        assert_eq!(PageType::for_level(3).to_byte(), TYPE_DATA + 3);
    }

    #[test]
    fn init_page_sets_watermarks() {
        let mut data = vec![0u8; 4096];
        init_page(&mut data, PageType::Data, 7, 100).unwrap();

        let header = PageHeader::from_bytes(&data).unwrap();
        assert_eq!(header.page_address(), 7);
        assert_eq!(header.page_type(), PageType::Data);
        assert_eq!(header.timestamp(), 100);
        assert_eq!(header.alloc(), 4096);
        assert_eq!(header.keyblock_end(), PAGE_HEADER_SIZE);
        assert_eq!(header.right_sibling(), 0);
    }

    #[test]
    fn odd_page_sizes_rejected() {
        let mut data = vec![0u8; 3000];
        assert!(init_page(&mut data, PageType::Data, 1, 0).is_err());
        assert!(validate_page_size(512).is_err());
        assert!(validate_page_size(32768).is_err());
    }
}
