//! # Per-Page Verification
//!
//! Structural checks for a single keyed page, used by the tree walker on
//! every page it visits. A failed check is returned as a [`PageFault`] value
//! rather than an error: the walker records it and keeps traversing.
//!
//! Checked here:
//!
//! - keys strictly increasing under cumulative reconstruction, with every
//!   keyblock's elision consistent with its predecessor
//! - tail blocks inside `[alloc, page_size)`, aligned, non-overlapping
//! - the page type matching the level the walker reached it at
//! - long-record descriptors well formed
//! - multi-version regions decodable with ascending version handles
//! - index child pointers inside `(0, MAX_VALID_PAGE_ADDR]`
//!
//! Chain-level checks (sibling ordering, child reachability, long-record
//! chain lengths) belong to the walker, which sees more than one page.

use eyre::Result;

use crate::config::{MAX_VALID_PAGE_ADDR, TAILBLOCK_ALIGNMENT};
use crate::mvcc;
use crate::page::codec::KeyedPage;
use crate::page::keyblock::{TailBlock, align4};
use crate::page::long_record::{LongRecord, is_long_record};
use crate::page::{PageHeader, PageType};

/// A structural defect found inside one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFault {
    pub description: String,
    /// Slot index the fault was found at, when applicable.
    pub position: usize,
}

impl PageFault {
    fn at(position: usize, description: impl Into<String>) -> Self {
        Self { description: description.into(), position }
    }
}

/// Callbacks invoked for every record that passes verification. The verifier
/// uses this to accumulate MVV statistics without a second pass.
pub trait VerifyVisitor {
    fn data_record(&mut self, _key: &[u8], _slot: usize, _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn index_record(&mut self, _key: &[u8], _slot: usize, _child: u64) -> Result<()> {
        Ok(())
    }
}

/// A visitor that ignores everything.
pub struct NullVisitor;

impl VerifyVisitor for NullVisitor {}

/// Verify one keyed page. `expected_type` is the type implied by the level
/// at which the walker reached the page.
pub fn verify_page(
    data: &[u8],
    expected_type: Option<PageType>,
    visitor: &mut dyn VerifyVisitor,
) -> Result<Option<PageFault>> {
    let header = match PageHeader::from_bytes(data) {
        Ok(h) => h,
        Err(e) => return Ok(Some(PageFault::at(0, e.to_string()))),
    };
    let page_type = header.page_type();
    if let Some(expected) = expected_type {
        if page_type != expected {
            return Ok(Some(PageFault::at(
                0,
                format!("unexpected page type {} (expected {})", page_type, expected),
            )));
        }
    }
    if !page_type.is_keyed() {
        return Ok(Some(PageFault::at(0, format!("page type {} is not verifiable as a keyed page", page_type))));
    }

    let page = match KeyedPage::read(data) {
        Ok(p) => p,
        Err(e) => return Ok(Some(PageFault::at(0, e.to_string()))),
    };
    let alloc = header.alloc();
    let is_index = matches!(page_type, PageType::Index(_));

    let mut tails: Vec<(usize, usize)> = Vec::with_capacity(page.keyblock_count());
    let mut prev_key: Option<Vec<u8>> = None;
    let mut key = Vec::new();

    for slot in 0..page.keyblock_count() {
        let kb = match page.keyblock(slot) {
            Ok(kb) => kb,
            Err(e) => return Ok(Some(PageFault::at(slot, e.to_string()))),
        };
        if kb.tbl < alloc || kb.tbl >= data.len() {
            return Ok(Some(PageFault::at(
                slot,
                format!("tail block offset {} outside tail region [{}, {})", kb.tbl, alloc, data.len()),
            )));
        }
        if kb.tbl % TAILBLOCK_ALIGNMENT != 0 {
            return Ok(Some(PageFault::at(slot, format!("tail block offset {} is not 4-byte aligned", kb.tbl))));
        }
        let tb = match TailBlock::read(data, kb.tbl) {
            Ok(tb) => tb,
            Err(e) => return Ok(Some(PageFault::at(slot, e.to_string()))),
        };
        tails.push((kb.tbl, align4(tb.size)));

        if !page.next_key(slot, &mut key).unwrap_or(false) {
            return Ok(Some(PageFault::at(slot, "key reconstruction failed".to_string())));
        }
        if prev_key.as_ref().is_some_and(|prev| key.as_slice() <= prev.as_slice()) {
            return Ok(Some(PageFault::at(slot, "keys are not strictly increasing".to_string())));
        }
        // Re-derive the key through advance to keep the cursor honest, then
        // check the stored elision against the actual shared prefix.
        if let Some(prev) = &prev_key {
            let lcp = crate::page::keyblock::shared_prefix(prev, &key);
            if kb.ebc > lcp {
                return Ok(Some(PageFault::at(
                    slot,
                    format!("elided byte count {} exceeds shared prefix {}", kb.ebc, lcp),
                )));
            }
        } else if kb.ebc != 0 {
            return Ok(Some(PageFault::at(slot, format!("first keyblock has elision {}", kb.ebc))));
        }
        prev_key = Some(key.clone());

        let value = match page.value_at(slot) {
            Ok(v) => v,
            Err(e) => return Ok(Some(PageFault::at(slot, e.to_string()))),
        };
        if is_index {
            if value.len() != 8 {
                return Ok(Some(PageFault::at(slot, format!("index pointer has {} bytes", value.len()))));
            }
            let child = u64::from_be_bytes(value.try_into().unwrap());
            if child == 0 || child > MAX_VALID_PAGE_ADDR {
                return Ok(Some(PageFault::at(slot, format!("invalid index pointer value {}", child))));
            }
            visitor.index_record(&key, slot, child)?;
        } else {
            if is_long_record(value) {
                match LongRecord::decode(value).and_then(|rec| rec.validate()) {
                    Ok(()) => {}
                    Err(e) => return Ok(Some(PageFault::at(slot, e.to_string()))),
                }
            } else if !mvcc::value::is_primordial(value) {
                if let Err(e) = mvcc::value::check_version_order(value) {
                    return Ok(Some(PageFault::at(slot, e.to_string())));
                }
            }
            visitor.data_record(&key, slot, value)?;
        }
    }

    tails.sort_unstable();
    for pair in tails.windows(2) {
        if pair[0].0 + pair[0].1 > pair[1].0 {
            return Ok(Some(PageFault::at(
                0,
                format!("tail blocks at {} and {} overlap", pair[0].0, pair[1].0),
            )));
        }
    }

    Ok(None)
}
