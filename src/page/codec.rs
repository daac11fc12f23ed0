//! # Keyed Page Codec
//!
//! Read and write views over Data and Index pages: the sorted keyblock
//! directory, front-compressed keys, and the tail allocator.
//!
//! ## Search
//!
//! [`KeyedPage::find`] scans keyblocks left to right but decides almost every
//! step from the packed `(EBC, DB)` fields alone, touching a tail block only
//! when the discriminator ties. The scan maintains `matched`, the length of
//! the prefix the probe key shares with the key of the previous keyblock:
//!
//! - `EBC > matched`: the slot key agrees with its predecessor past the point
//!   where the probe diverged upward, so it is still below the probe. Skip.
//! - `EBC < matched`: the slot key diverges from its predecessor before the
//!   probe does, and pages are sorted, so the slot key is above the probe.
//!   The probe belongs at this slot.
//! - `EBC == matched`: the discriminator byte decides, and only an exact tie
//!   reads the key remainder from the tail.
//!
//! ## Insertion
//!
//! Insertion first tries an in-place fit. When the gap between `keyblock_end`
//! and `alloc` is too small it compacts the tail region (live tail blocks are
//! rewritten against the page end and every TBL is updated) and retries. If
//! the record still does not fit, [`InsertOutcome::NeedsSplit`] is returned
//! and the caller splits the page.
//!
//! Inserting before an existing keyblock can change that keyblock's elision
//! (its new predecessor shares a different prefix), in which case its tail is
//! rewritten with the recomputed remainder.
//!
//! ## Split
//!
//! [`KeyedPageMut::split_into`] redistributes the page's records, plus an
//! optional pending insertion, so the two halves hold approximately equal
//! bytes of live tail. When the pending key sorts at or past the boundary the
//! tie breaks toward the earlier split slot, which keeps ascending insertion
//! streams from rewriting the right page. The first key of the right half is
//! the promoted key; on the right page it is stored with `EBC = 0`.

use eyre::{Result, ensure};

use crate::config::{KEYBLOCK_LENGTH, KEY_BLOCK_START, LONGREC_SIZE, MAX_KEY_LENGTH, TAILBLOCK_HEADER_SIZE};
use crate::page::keyblock::{
    Keyblock, TailBlock, align4, read_keyblock, shared_prefix, tailblock_size, write_keyblock,
};
use crate::page::long_record::{LONGREC_TYPE, LongRecord};
use crate::page::{PageHeader, PageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindResult {
    pub found: bool,
    /// Matching slot when found, insertion point otherwise.
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Done,
    NeedsSplit,
}

/// One decoded record. Only materialized for rebuilds and splits; ordinary
/// reads stay inside the page buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Read-only view of a Data or Index page.
#[derive(Debug, Clone, Copy)]
pub struct KeyedPage<'a> {
    data: &'a [u8],
}

/// Mutable view of a Data or Index page. All structural mutation happens
/// while the caller holds the page's exclusive claim.
pub struct KeyedPageMut<'a> {
    data: &'a mut [u8],
}

fn check_keyed(data: &[u8]) -> Result<()> {
    let header = PageHeader::from_bytes(data)?;
    let page_type = header.page_type();
    ensure!(
        page_type.is_keyed(),
        "expected a Data or Index page, got {} on page {}",
        page_type,
        header.page_address()
    );
    ensure!(
        header.keyblock_end() >= KEY_BLOCK_START
            && header.keyblock_end() <= header.alloc()
            && header.alloc() <= data.len(),
        "page {} watermarks out of order: keyblock_end={} alloc={} size={}",
        header.page_address(),
        header.keyblock_end(),
        header.alloc(),
        data.len()
    );
    ensure!(
        (header.keyblock_end() - KEY_BLOCK_START) % KEYBLOCK_LENGTH == 0,
        "page {} keyblock region is not a whole number of keyblocks",
        header.page_address()
    );
    Ok(())
}

fn keyblock_count(data: &[u8]) -> usize {
    let header = PageHeader::from_bytes(data).expect("validated page");
    (header.keyblock_end() - KEY_BLOCK_START) / KEYBLOCK_LENGTH
}

/// Update `key` from the full key of `slot - 1` to the full key of `slot`.
/// For slot 0 the incoming buffer must be empty.
fn advance_key(data: &[u8], slot: usize, key: &mut Vec<u8>) -> Result<()> {
    let kb = read_keyblock(data, slot);
    let tb = TailBlock::read(data, kb.tbl)?;
    ensure!(
        kb.ebc <= key.len(),
        "keyblock {} elides {} bytes but the preceding key has only {}",
        slot,
        kb.ebc,
        key.len()
    );
    key.truncate(kb.ebc);
    if tb.klength > 0 {
        let remainder = tb.key_remainder_len(kb.ebc);
        ensure!(
            kb.ebc + 1 + remainder == tb.klength,
            "keyblock {} remainder {} disagrees with klength {} (ebc {})",
            slot,
            remainder,
            tb.klength,
            kb.ebc
        );
        key.push(kb.db);
        let start = kb.tbl + TAILBLOCK_HEADER_SIZE;
        key.extend_from_slice(&data[start..start + remainder]);
    } else {
        ensure!(kb.ebc == 0, "empty key with nonzero elision at slot {}", slot);
    }
    Ok(())
}

fn read_key(data: &[u8], slot: usize) -> Result<Vec<u8>> {
    let mut key = Vec::new();
    for s in 0..=slot {
        advance_key(data, s, &mut key)?;
    }
    Ok(key)
}

fn value_slice(data: &[u8], slot: usize) -> Result<&[u8]> {
    let kb = read_keyblock(data, slot);
    let tb = TailBlock::read(data, kb.tbl)?;
    Ok(&data[tb.value_range(kb.tbl, kb.ebc)])
}

fn find(data: &[u8], key: &[u8]) -> Result<FindResult> {
    let count = keyblock_count(data);
    let mut matched = 0usize;

    for slot in 0..count {
        let kb = read_keyblock(data, slot);
        if slot > 0 {
            if kb.ebc > matched {
                continue;
            }
            if kb.ebc < matched {
                return Ok(FindResult { found: false, slot });
            }
        }

        let tb = TailBlock::read(data, kb.tbl)?;
        if tb.klength == 0 {
            // Left-edge sentinel. Below everything except the empty probe.
            if key.is_empty() {
                return Ok(FindResult { found: true, slot });
            }
            matched = 0;
            continue;
        }
        if matched >= key.len() {
            // The probe is a strict prefix of this slot's key.
            return Ok(FindResult { found: false, slot });
        }
        match kb.db.cmp(&key[matched]) {
            std::cmp::Ordering::Less => continue,
            std::cmp::Ordering::Greater => return Ok(FindResult { found: false, slot }),
            std::cmp::Ordering::Equal => {}
        }

        let remainder_len = tb.key_remainder_len(kb.ebc);
        let start = kb.tbl + TAILBLOCK_HEADER_SIZE;
        let remainder = &data[start..start + remainder_len];
        let probe_rest = &key[matched + 1..];
        let common = shared_prefix(remainder, probe_rest);
        if common == remainder.len() && common == probe_rest.len() {
            return Ok(FindResult { found: true, slot });
        }
        if common == probe_rest.len() || (common < remainder.len() && remainder[common] > probe_rest[common]) {
            return Ok(FindResult { found: false, slot });
        }
        // Slot key is below the probe; it matched one discriminator byte plus
        // `common` remainder bytes.
        matched = matched + 1 + common;
    }

    Ok(FindResult { found: false, slot: count })
}

impl<'a> KeyedPage<'a> {
    pub fn read(data: &'a [u8]) -> Result<Self> {
        check_keyed(data)?;
        Ok(Self { data })
    }

    pub fn header(&self) -> &PageHeader {
        PageHeader::from_bytes(self.data).expect("validated page")
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn keyblock_count(&self) -> usize {
        keyblock_count(self.data)
    }

    pub fn keyblock(&self, slot: usize) -> Result<Keyblock> {
        ensure!(slot < self.keyblock_count(), "slot {} out of bounds", slot);
        Ok(read_keyblock(self.data, slot))
    }

    /// Reconstruct the full key at `slot`. O(slot) because of front
    /// compression; use [`KeyedPage::next_key`] for sequential walks.
    pub fn key_at(&self, slot: usize) -> Result<Vec<u8>> {
        ensure!(slot < self.keyblock_count(), "slot {} out of bounds", slot);
        read_key(self.data, slot)
    }

    pub fn value_at(&self, slot: usize) -> Result<&'a [u8]> {
        ensure!(slot < self.keyblock_count(), "slot {} out of bounds", slot);
        let kb = read_keyblock(self.data, slot);
        let tb = TailBlock::read(self.data, kb.tbl)?;
        Ok(&self.data[tb.value_range(kb.tbl, kb.ebc)])
    }

    /// Child pointer stored at `slot` of an index page.
    pub fn child_at(&self, slot: usize) -> Result<u64> {
        ensure!(
            matches!(self.header().page_type(), PageType::Index(_)),
            "child_at on non-index page {}",
            self.header().page_address()
        );
        let value = self.value_at(slot)?;
        ensure!(
            value.len() == 8,
            "index page {} slot {} has a {}-byte pointer",
            self.header().page_address(),
            slot,
            value.len()
        );
        Ok(u64::from_be_bytes(value.try_into().unwrap()))
    }

    pub fn find(&self, key: &[u8]) -> Result<FindResult> {
        find(self.data, key)
    }

    /// Advance `key` from the key at `slot - 1` to the key at `slot`,
    /// returning false once past the last keyblock. Start with an empty
    /// buffer at slot 0.
    pub fn next_key(&self, slot: usize, key: &mut Vec<u8>) -> Result<bool> {
        if slot >= self.keyblock_count() {
            return Ok(false);
        }
        advance_key(self.data, slot, key)?;
        Ok(true)
    }

    /// Find the next long-record descriptor at or after `from_slot`.
    pub fn next_long_record(&self, from_slot: usize) -> Result<Option<(usize, LongRecord)>> {
        for slot in from_slot..self.keyblock_count() {
            let value = self.value_at(slot)?;
            if value.len() == LONGREC_SIZE && value[0] == LONGREC_TYPE {
                return Ok(Some((slot, LongRecord::decode(value)?)));
            }
        }
        Ok(None)
    }

    /// Bytes of the page occupied by keyblocks and live tail blocks.
    pub fn bytes_in_use(&self) -> Result<usize> {
        let mut used = self.keyblock_count() * KEYBLOCK_LENGTH;
        for slot in 0..self.keyblock_count() {
            let kb = read_keyblock(self.data, slot);
            let tb = TailBlock::read(self.data, kb.tbl)?;
            used += align4(tb.size);
        }
        Ok(used)
    }

    /// Decode every record on the page in key order.
    pub fn records(&self) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(self.keyblock_count());
        let mut key = Vec::new();
        for slot in 0..self.keyblock_count() {
            advance_key(self.data, slot, &mut key)?;
            records.push(Record { key: key.clone(), value: value_slice(self.data, slot)?.to_vec() });
        }
        Ok(records)
    }
}

/// Exact bytes the record sequence occupies on a page, front compression
/// included.
fn layout_size(records: &[Record]) -> usize {
    let mut size = KEY_BLOCK_START;
    let mut prev: Option<&[u8]> = None;
    for record in records {
        let ebc = prev.map_or(0, |p| shared_prefix(p, &record.key));
        size += KEYBLOCK_LENGTH + align4(tailblock_size(record.key.len(), ebc, record.value.len()));
        prev = Some(&record.key);
    }
    size
}

impl<'a> KeyedPageMut<'a> {
    pub fn write(data: &'a mut [u8]) -> Result<Self> {
        check_keyed(data)?;
        Ok(Self { data })
    }

    pub fn as_read(&self) -> KeyedPage<'_> {
        KeyedPage { data: self.data }
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        PageHeader::from_bytes_mut(self.data).expect("validated page")
    }

    fn free_gap(&self) -> usize {
        let header = PageHeader::from_bytes(self.data).expect("validated page");
        header.alloc() - header.keyblock_end()
    }

    /// Insert `key` with `value`, replacing the value if the key is present.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        ensure!(
            key.len() <= MAX_KEY_LENGTH,
            crate::error::ErrorKind::InvalidArgument(format!(
                "key length {} exceeds maximum {}",
                key.len(),
                MAX_KEY_LENGTH
            ))
        );
        let fr = find(self.data, key)?;
        if fr.found {
            return self.replace_value(fr.slot, value);
        }
        self.insert_at(fr.slot, key, value)
    }

    fn insert_at(&mut self, slot: usize, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let count = keyblock_count(self.data);
        let prev_key = if slot > 0 { read_key(self.data, slot - 1)? } else { Vec::new() };
        let ebc = if slot > 0 { shared_prefix(&prev_key, key) } else { 0 };
        let new_tail = align4(tailblock_size(key.len(), ebc, value.len()));

        // An insertion in front of an existing keyblock can change that
        // keyblock's elision; its tail must then be rewritten.
        let successor = if slot < count {
            let succ_kb = read_keyblock(self.data, slot);
            let succ_key = read_key(self.data, slot)?;
            let succ_value = value_slice(self.data, slot)?.to_vec();
            let new_ebc = shared_prefix(key, &succ_key);
            (new_ebc != succ_kb.ebc).then_some((succ_key, succ_value, new_ebc))
        } else {
            None
        };

        let mut needed = KEYBLOCK_LENGTH + new_tail;
        if let Some((succ_key, succ_value, new_ebc)) = &successor {
            needed += align4(tailblock_size(succ_key.len(), *new_ebc, succ_value.len()));
        }

        if self.free_gap() < needed {
            self.compact()?;
            if self.free_gap() < needed {
                return Ok(InsertOutcome::NeedsSplit);
            }
        }

        let page_size = self.data.len();
        let tbl = {
            let header = self.header_mut();
            let tbl = header.alloc() - new_tail;
            header.set_alloc(tbl);
            tbl
        };
        let raw = tailblock_size(key.len(), ebc, value.len());
        TailBlock::write(self.data, tbl, raw, key.len());
        let remainder_len = key.len().saturating_sub(ebc + 1);
        let rem_start = tbl + TAILBLOCK_HEADER_SIZE;
        if remainder_len > 0 {
            self.data[rem_start..rem_start + remainder_len].copy_from_slice(&key[ebc + 1..]);
        }
        self.data[rem_start + remainder_len..tbl + raw].copy_from_slice(value);
        debug_assert!(tbl + raw <= page_size);

        // Shift keyblocks right to open the slot.
        let header = PageHeader::from_bytes(self.data)?;
        let kb_end = header.keyblock_end();
        let open = KEY_BLOCK_START + slot * KEYBLOCK_LENGTH;
        self.data.copy_within(open..kb_end, open + KEYBLOCK_LENGTH);
        write_keyblock(self.data, slot, Keyblock::for_key(key, (slot > 0).then(|| prev_key.as_slice()), tbl));
        self.header_mut().set_keyblock_end(kb_end + KEYBLOCK_LENGTH);

        if let Some((succ_key, succ_value, new_ebc)) = successor {
            let raw = tailblock_size(succ_key.len(), new_ebc, succ_value.len());
            let succ_tbl = {
                let header = self.header_mut();
                let tbl = header.alloc() - align4(raw);
                header.set_alloc(tbl);
                tbl
            };
            TailBlock::write(self.data, succ_tbl, raw, succ_key.len());
            let remainder = &succ_key[new_ebc + 1..];
            let start = succ_tbl + TAILBLOCK_HEADER_SIZE;
            self.data[start..start + remainder.len()].copy_from_slice(remainder);
            self.data[start + remainder.len()..succ_tbl + raw].copy_from_slice(&succ_value);
            write_keyblock(
                self.data,
                slot + 1,
                Keyblock::new(new_ebc, succ_key[new_ebc], succ_tbl),
            );
        }

        Ok(InsertOutcome::Done)
    }

    /// Replace the value at `slot`, preserving the key.
    pub fn replace_value(&mut self, slot: usize, value: &[u8]) -> Result<InsertOutcome> {
        ensure!(slot < keyblock_count(self.data), "slot {} out of bounds", slot);
        let kb = read_keyblock(self.data, slot);
        let tb = TailBlock::read(self.data, kb.tbl)?;
        let remainder_len = tb.key_remainder_len(kb.ebc);
        let raw = TAILBLOCK_HEADER_SIZE + remainder_len + value.len();

        if align4(raw) <= align4(tb.size) {
            TailBlock::write(self.data, kb.tbl, raw, tb.klength);
            let start = kb.tbl + TAILBLOCK_HEADER_SIZE + remainder_len;
            self.data[start..start + value.len()].copy_from_slice(value);
            return Ok(InsertOutcome::Done);
        }

        let remainder =
            self.data[kb.tbl + TAILBLOCK_HEADER_SIZE..kb.tbl + TAILBLOCK_HEADER_SIZE + remainder_len].to_vec();
        if self.free_gap() < align4(raw) {
            self.compact()?;
            if self.free_gap() < align4(raw) {
                return Ok(InsertOutcome::NeedsSplit);
            }
        }
        // The keyblock may have moved its tail during compaction; re-read.
        let kb = read_keyblock(self.data, slot);
        let tbl = {
            let header = self.header_mut();
            let tbl = header.alloc() - align4(raw);
            header.set_alloc(tbl);
            tbl
        };
        TailBlock::write(self.data, tbl, raw, tb.klength);
        let start = tbl + TAILBLOCK_HEADER_SIZE;
        self.data[start..start + remainder.len()].copy_from_slice(&remainder);
        self.data[start + remainder.len()..tbl + raw].copy_from_slice(value);
        write_keyblock(self.data, slot, Keyblock::new(kb.ebc, kb.db, tbl));
        Ok(InsertOutcome::Done)
    }

    /// Remove the record at `slot`. The successor's elision is re-derived
    /// against its new predecessor, so the page is rebuilt.
    pub fn remove(&mut self, slot: usize) -> Result<()> {
        let count = keyblock_count(self.data);
        ensure!(slot < count, "slot {} out of bounds (count {})", slot, count);
        let mut records = self.as_read().records()?;
        records.remove(slot);
        self.rebuild(&records)
    }

    /// Rewrite the tail region with live blocks only, leaving the free gap
    /// contiguous. Every TBL is updated.
    pub fn compact(&mut self) -> Result<()> {
        let records = self.as_read().records()?;
        self.rebuild(&records)
    }

    fn rebuild(&mut self, records: &[Record]) -> Result<()> {
        let page_size = self.data.len();
        ensure!(
            layout_size(records) <= page_size,
            "record sequence needs {} bytes but the page holds {}",
            layout_size(records),
            page_size
        );

        let mut alloc = page_size;
        let mut prev: Option<&[u8]> = None;
        let mut keyblocks = Vec::with_capacity(records.len());
        // Stage tails into a scratch image so a record can be rebuilt from
        // bytes that the rewrite is about to overwrite.
        let mut tails = vec![0u8; page_size];
        for record in records {
            let ebc = prev.map_or(0, |p| shared_prefix(p, &record.key));
            let raw = tailblock_size(record.key.len(), ebc, record.value.len());
            alloc -= align4(raw);
            TailBlock::write(&mut tails, alloc, raw, record.key.len());
            let remainder_len = record.key.len().saturating_sub(ebc + 1);
            let start = alloc + TAILBLOCK_HEADER_SIZE;
            if remainder_len > 0 {
                tails[start..start + remainder_len].copy_from_slice(&record.key[ebc + 1..]);
            }
            tails[start + remainder_len..alloc + raw].copy_from_slice(&record.value);
            let db = if record.key.len() > ebc { record.key[ebc] } else { 0 };
            keyblocks.push(Keyblock::new(ebc, db, alloc));
            prev = Some(&record.key);
        }

        self.data[alloc..page_size].copy_from_slice(&tails[alloc..page_size]);
        for (slot, kb) in keyblocks.iter().enumerate() {
            write_keyblock(self.data, slot, *kb);
        }
        let keyblock_end = KEY_BLOCK_START + records.len() * KEYBLOCK_LENGTH;
        let header = self.header_mut();
        header.set_keyblock_end(keyblock_end);
        header.set_alloc(alloc);
        // Zero the gap so stale keyblocks never masquerade as live ones.
        self.data[keyblock_end..alloc].fill(0);
        Ok(())
    }

    /// Split this page into itself (left half) and `right`, optionally
    /// folding in a pending record that did not fit. `right` must already be
    /// initialized with the same page type. Returns the promoted key: the
    /// first key of the right half.
    pub fn split_into(&mut self, right: &mut KeyedPageMut<'_>, pending: Option<(&[u8], &[u8])>) -> Result<Vec<u8>> {
        ensure!(
            self.as_read().header().page_type() == right.as_read().header().page_type(),
            "split halves must share a page type"
        );
        let mut records = self.as_read().records()?;
        let pending_key = pending.map(|(k, _)| k.to_vec());
        if let Some((key, value)) = pending {
            match records.binary_search_by(|r| r.key.as_slice().cmp(key)) {
                Ok(at) => records[at].value = value.to_vec(),
                Err(at) => records.insert(at, Record { key: key.to_vec(), value: value.to_vec() }),
            }
        }
        ensure!(records.len() >= 2, "cannot split a page holding {} records", records.len());

        let weights: Vec<usize> = records
            .iter()
            .map(|r| KEYBLOCK_LENGTH + align4(tailblock_size(r.key.len(), 0, r.value.len())))
            .collect();
        let total: usize = weights.iter().sum();

        let mut best = 1usize;
        let mut best_metric = usize::MAX;
        let mut prefix = 0usize;
        for split in 1..records.len() {
            prefix += weights[split - 1];
            let metric = (2 * prefix).abs_diff(total);
            if metric < best_metric {
                best = split;
                best_metric = metric;
            } else if metric == best_metric {
                let keep_earlier = pending_key
                    .as_deref()
                    .is_none_or(|k| k >= records[best].key.as_slice());
                if !keep_earlier {
                    best = split;
                    best_metric = metric;
                }
            }
        }

        let page_size = self.data.len();
        let mut split = best;
        while split < records.len() - 1 && layout_size(&records[..split]) > page_size {
            split += 1;
        }
        while split > 1 && layout_size(&records[split..]) > page_size {
            split -= 1;
        }
        ensure!(
            layout_size(&records[..split]) <= page_size && layout_size(&records[split..]) <= page_size,
            crate::error::ErrorKind::CorruptVolume(format!(
                "page {} cannot be split: a record exceeds the page capacity",
                self.as_read().header().page_address()
            ))
        );

        let promoted = records[split].key.clone();
        let old_right_sibling = self.as_read().header().right_sibling();
        let right_address = right.as_read().header().page_address();

        right.rebuild(&records[split..])?;
        self.rebuild(&records[..split])?;
        right.header_mut().set_right_sibling(old_right_sibling);
        self.header_mut().set_right_sibling(right_address);
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::key::encode_text;
    use crate::page::init_page;

    fn new_data_page(size: usize) -> Vec<u8> {
        let mut data = vec![0u8; size];
        init_page(&mut data, PageType::Data, 5, 1).unwrap();
        data
    }

    fn insert_all(data: &mut [u8], pairs: &[(&str, &[u8])]) {
        let mut page = KeyedPageMut::write(data).unwrap();
        for (key, value) in pairs {
            assert_eq!(page.insert(&encode_text(key), value).unwrap(), InsertOutcome::Done);
        }
    }

    #[test]
    fn insert_and_find_sequential_keys() {
        let mut data = new_data_page(4096);
        insert_all(
            &mut data,
            &[("a", b"0"), ("b", b"1"), ("c", b"2"), ("d", b"3"), ("e", b"4"), ("f", b"5")],
        );

        let page = KeyedPage::read(&data).unwrap();
        assert_eq!(page.keyblock_count(), 6);
        let fr = page.find(&encode_text("c")).unwrap();
        assert!(fr.found);
        assert_eq!(fr.slot, 2);
        // The text prefix byte is shared with the predecessor, so one byte is
        // elided and the discriminator is the first distinct byte.
        let kb = page.keyblock(2).unwrap();
        assert_eq!(kb.ebc, 1);
        assert_eq!(kb.db, b'c');
        assert_eq!(page.value_at(2).unwrap(), b"2");
    }

    #[test]
    fn find_reports_insertion_point() {
        let mut data = new_data_page(4096);
        insert_all(&mut data, &[("b", b"1"), ("d", b"2"), ("f", b"3")]);

        let page = KeyedPage::read(&data).unwrap();
        let fr = page.find(&encode_text("c")).unwrap();
        assert!(!fr.found);
        assert_eq!(fr.slot, 1);
        let fr = page.find(&encode_text("a")).unwrap();
        assert_eq!((fr.found, fr.slot), (false, 0));
        let fr = page.find(&encode_text("z")).unwrap();
        assert_eq!((fr.found, fr.slot), (false, 3));
    }

    #[test]
    fn out_of_order_inserts_keep_keys_sorted() {
        let mut data = new_data_page(4096);
        insert_all(&mut data, &[("delta", b"4"), ("alpha", b"1"), ("charlie", b"3"), ("bravo", b"2")]);

        let page = KeyedPage::read(&data).unwrap();
        let mut key = Vec::new();
        let mut seen = Vec::new();
        let mut slot = 0;
        while page.next_key(slot, &mut key).unwrap() {
            seen.push(key.clone());
            slot += 1;
        }
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn insert_before_existing_rewrites_successor_elision() {
        let mut data = new_data_page(4096);
        insert_all(&mut data, &[("b", b"1"), ("cc", b"2")]);
        // "cc" elides one byte against "b". Inserting "ca" between them
        // deepens the elision.
        insert_all(&mut data, &[("ca", b"x")]);

        let page = KeyedPage::read(&data).unwrap();
        assert_eq!(page.key_at(1).unwrap(), encode_text("ca"));
        assert_eq!(page.key_at(2).unwrap(), encode_text("cc"));
        let kb = page.keyblock(2).unwrap();
        assert_eq!(kb.ebc, 2);
        assert_eq!(page.value_at(2).unwrap(), b"2");
    }

    #[test]
    fn replace_value_in_place_and_grown() {
        let mut data = new_data_page(4096);
        insert_all(&mut data, &[("k", b"small"), ("m", b"other")]);

        let mut page = KeyedPageMut::write(&mut data).unwrap();
        let fr = page.as_read().find(&encode_text("k")).unwrap();
        assert_eq!(page.replace_value(fr.slot, b"tiny").unwrap(), InsertOutcome::Done);
        assert_eq!(page.as_read().value_at(fr.slot).unwrap(), b"tiny");

        let grown = vec![0xAB; 300];
        assert_eq!(page.replace_value(fr.slot, &grown).unwrap(), InsertOutcome::Done);
        assert_eq!(page.as_read().value_at(fr.slot).unwrap(), grown.as_slice());
        assert_eq!(page.as_read().key_at(fr.slot).unwrap(), encode_text("k"));
    }

    #[test]
    fn remove_rederives_successor_elision() {
        let mut data = new_data_page(4096);
        insert_all(&mut data, &[("a", b"1"), ("cab", b"2"), ("cat", b"3")]);

        let mut page = KeyedPageMut::write(&mut data).unwrap();
        page.remove(1).unwrap();

        let page = KeyedPage::read(&data).unwrap();
        assert_eq!(page.keyblock_count(), 2);
        assert_eq!(page.key_at(1).unwrap(), encode_text("cat"));
        // "cat" now follows "a", so only the type prefix byte is shared.
        assert_eq!(page.keyblock(1).unwrap().ebc, 1);
        assert_eq!(page.value_at(1).unwrap(), b"3");
    }

    #[test]
    fn compaction_reclaims_holes() {
        let mut data = new_data_page(1024);
        let mut page = KeyedPageMut::write(&mut data).unwrap();
        for i in 0..8 {
            let key = encode_text(&format!("key{:02}", i));
            assert_eq!(page.insert(&key, &[i as u8; 64]).unwrap(), InsertOutcome::Done);
        }
        // Each grow abandons the old tail block as a hole. The later grows
        // only fit once compaction has folded those holes back into the gap.
        for slot in 0..8 {
            assert_eq!(page.replace_value(slot, &[slot as u8; 100]).unwrap(), InsertOutcome::Done);
        }
        let read = page.as_read();
        for slot in 0..8 {
            assert_eq!(read.value_at(slot).unwrap(), &[slot as u8; 100][..]);
        }
    }

    #[test]
    fn remove_then_insert_reuses_space() {
        let mut data = new_data_page(1024);
        let mut page = KeyedPageMut::write(&mut data).unwrap();
        for i in 0..8 {
            let key = encode_text(&format!("key{:02}", i));
            assert_eq!(page.insert(&key, &[i as u8; 64]).unwrap(), InsertOutcome::Done);
        }
        for slot in (0..8).step_by(2).rev() {
            page.remove(slot).unwrap();
        }
        assert_eq!(page.insert(&encode_text("zz"), &[0xCD; 200]).unwrap(), InsertOutcome::Done);
        let read = page.as_read();
        assert_eq!(read.keyblock_count(), 5);
        assert_eq!(read.value_at(4).unwrap(), &[0xCD; 200][..]);
    }

    #[test]
    fn oversized_insert_reports_needs_split() {
        let mut data = new_data_page(1024);
        let mut page = KeyedPageMut::write(&mut data).unwrap();
        assert_eq!(page.insert(&encode_text("a"), &[1u8; 400]).unwrap(), InsertOutcome::Done);
        assert_eq!(page.insert(&encode_text("b"), &[2u8; 400]).unwrap(), InsertOutcome::Done);
        assert_eq!(page.insert(&encode_text("c"), &[3u8; 400]).unwrap(), InsertOutcome::NeedsSplit);
    }

    #[test]
    fn split_balances_and_promotes_first_right_key() {
        let mut left = new_data_page(4096);
        insert_all(
            &mut left,
            &[("a", b"0"), ("b", b"1"), ("c", b"2"), ("d", b"3"), ("e", b"4"), ("f", b"5")],
        );
        let mut right = vec![0u8; 4096];
        init_page(&mut right, PageType::Data, 9, 2).unwrap();

        let big = vec![0x42u8; 4000];
        let mut left_page = KeyedPageMut::write(&mut left).unwrap();
        assert_eq!(
            left_page.insert(&encode_text("ccc"), &big).unwrap(),
            InsertOutcome::NeedsSplit
        );
        let mut right_page = KeyedPageMut::write(&mut right).unwrap();
        let promoted = left_page
            .split_into(&mut right_page, Some((&encode_text("ccc"), &big)))
            .unwrap();
        assert_eq!(promoted, encode_text("ccc"));

        let left_keys: Vec<Vec<u8>> =
            (0..left_page.as_read().keyblock_count()).map(|s| left_page.as_read().key_at(s).unwrap()).collect();
        let right_keys: Vec<Vec<u8>> =
            (0..right_page.as_read().keyblock_count()).map(|s| right_page.as_read().key_at(s).unwrap()).collect();
        assert_eq!(left_keys, vec![encode_text("a"), encode_text("b"), encode_text("c")]);
        assert_eq!(
            right_keys,
            vec![encode_text("ccc"), encode_text("d"), encode_text("e"), encode_text("f")]
        );
        // The promoted key opens the right page with no predecessor to elide
        // against.
        assert_eq!(right_page.as_read().keyblock(0).unwrap().ebc, 0);
        assert_eq!(right_page.as_read().value_at(0).unwrap(), big.as_slice());
        // Sibling chain: left now points at right.
        assert_eq!(left_page.as_read().header().right_sibling(), 9);
    }

    #[test]
    fn split_links_existing_right_sibling() {
        let mut left = new_data_page(2048);
        {
            let mut page = KeyedPageMut::write(&mut left).unwrap();
            page.header_mut().set_right_sibling(77);
            for i in 0..6 {
                page.insert(&encode_text(&format!("k{}", i)), &[0u8; 200]).unwrap();
            }
        }
        let mut right = vec![0u8; 2048];
        init_page(&mut right, PageType::Data, 30, 2).unwrap();

        let mut left_page = KeyedPageMut::write(&mut left).unwrap();
        let mut right_page = KeyedPageMut::write(&mut right).unwrap();
        left_page.split_into(&mut right_page, None).unwrap();

        assert_eq!(left_page.as_read().header().right_sibling(), 30);
        assert_eq!(right_page.as_read().header().right_sibling(), 77);
    }

    #[test]
    fn round_trip_decode_encode_preserves_records() {
        let mut data = new_data_page(4096);
        insert_all(&mut data, &[("ant", b"one"), ("antelope", b"two"), ("badger", b"three")]);
        let records = KeyedPage::read(&data).unwrap().records().unwrap();

        let mut rebuilt = new_data_page(4096);
        {
            let mut page = KeyedPageMut::write(&mut rebuilt).unwrap();
            for r in &records {
                page.insert(&r.key, &r.value).unwrap();
            }
        }
        assert_eq!(KeyedPage::read(&rebuilt).unwrap().records().unwrap(), records);
    }

    #[test]
    fn empty_left_edge_key_is_supported() {
        let mut data = vec![0u8; 4096];
        init_page(&mut data, PageType::Index(1), 4, 1).unwrap();
        let mut page = KeyedPageMut::write(&mut data).unwrap();
        page.insert(b"", &10u64.to_be_bytes()).unwrap();
        page.insert(&encode_text("m"), &11u64.to_be_bytes()).unwrap();

        let read = page.as_read();
        assert_eq!(read.key_at(0).unwrap(), Vec::<u8>::new());
        assert_eq!(read.child_at(0).unwrap(), 10);
        let fr = read.find(&encode_text("a")).unwrap();
        assert_eq!((fr.found, fr.slot), (false, 1));
    }
}
