//! # Trees
//!
//! A tree is a sequence of levels: level 0 holds Data pages, the root sits at
//! level `depth - 1`, and each level's pages are linked left to right through
//! `right_sibling`. Tree identities (name, root, depth, handle) live as
//! records of the volume's directory tree; the directory tree's own root and
//! depth live in the volume head.
//!
//! This module carries the write path the rest of the core is exercised
//! with: store, versioned store, remove, long-record spill, and tree
//! create/drop. Splits propagate upward along the descent path; a root split
//! adds a level and re-homes the tree's root pointer.
//!
//! ## Claim Discipline
//!
//! Readers claim one level at a time, shared, releasing the parent once the
//! child is claimed. Writers claim the whole descent path exclusively for
//! the duration of the operation, which keeps split propagation simple at
//! the cost of concurrency on hot paths. Mutators consult the volume's
//! update-suspension flag before claiming anything.

use eyre::{Result, ensure};

use crate::config::{MAX_TREE_DEPTH, PAGE_HEADER_SIZE};
use crate::encoding::key::{decode_text, encode_text};
use crate::error::ErrorKind;
use crate::mvcc::{self, TYPE_ANTIVALUE, TransactionIndex};
use crate::page::codec::{InsertOutcome, KeyedPage, KeyedPageMut};
use crate::page::long_record::{LongRecord, is_long_record};
use crate::page::{PageHeader, PageType, init_page};
use crate::pool::Buffer;
use crate::volume::Volume;

pub const DIRECTORY_TREE_NAME: &str = "_directory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub name: String,
    pub handle: u32,
    pub root: u64,
    pub depth: usize,
    pub is_directory: bool,
}

impl Tree {
    pub fn resource_name(&self, volume: &Volume) -> String {
        format!("{}:{}", volume.name(), self.name)
    }
}

fn encode_directory_entry(root: u64, depth: usize, handle: u32) -> [u8; 13] {
    let mut out = [0u8; 13];
    out[0..8].copy_from_slice(&root.to_be_bytes());
    out[8] = depth as u8;
    out[9..13].copy_from_slice(&handle.to_be_bytes());
    out
}

fn decode_directory_entry(value: &[u8]) -> Result<(u64, usize, u32)> {
    ensure!(
        value.len() == 13,
        ErrorKind::CorruptVolume(format!("directory entry has {} bytes", value.len()))
    );
    Ok((
        u64::from_be_bytes(value[0..8].try_into().unwrap()),
        value[8] as usize,
        u32::from_be_bytes(value[9..13].try_into().unwrap()),
    ))
}

impl Volume {
    pub fn directory_tree(&self) -> Result<Tree> {
        let head = self.head()?;
        Ok(Tree {
            name: DIRECTORY_TREE_NAME.to_string(),
            handle: 0,
            root: head.directory_root,
            depth: head.directory_depth,
            is_directory: true,
        })
    }

    pub fn get_tree(&self, name: &str) -> Result<Option<Tree>> {
        let directory = self.directory_tree()?;
        match lookup_raw(self, &directory, &encode_text(name))? {
            Some(value) => {
                let (root, depth, handle) = decode_directory_entry(&value)?;
                Ok(Some(Tree { name: name.to_string(), handle, root, depth, is_directory: false }))
            }
            None => Ok(None),
        }
    }

    pub fn create_tree(&self, name: &str) -> Result<Tree> {
        ensure!(
            name != DIRECTORY_TREE_NAME,
            ErrorKind::InvalidArgument(format!("tree name {:?} is reserved", name))
        );
        if let Some(existing) = self.get_tree(name)? {
            return Ok(existing);
        }
        let root = self.allocate_page()?;
        let ts = self.timestamps().update();
        {
            let mut buffer = self.pool().get(root, true, true)?;
            init_page(buffer.bytes_mut()?, PageType::Data, root, ts)?;
        }
        let handle = self.allocate_tree_handle()?;
        let mut directory = self.directory_tree()?;
        let mut writer = TreeWriter::new(self, &mut directory);
        writer.store(&encode_text(name), &encode_directory_entry(root, 1, handle))?;
        Ok(Tree { name: name.to_string(), handle, root, depth: 1, is_directory: false })
    }

    pub fn tree_names(&self) -> Result<Vec<String>> {
        let directory = self.directory_tree()?;
        let mut names = Vec::new();
        for (key, _) in scan_records(self, &directory)? {
            names.push(decode_text(&key)?);
        }
        Ok(names)
    }

    /// Destroy a tree: every level chain and every long-record chain is
    /// pushed onto the garbage list, then the directory entry is removed.
    pub fn drop_tree(&self, tree: &Tree) -> Result<()> {
        ensure!(
            !tree.is_directory,
            ErrorKind::StateViolation("the directory tree cannot be dropped".to_string())
        );
        let lock = self.tree_lock(&tree.name);
        let _claim = lock.write();

        // Long-record chains first, while the leaves are still reachable.
        for (_, value) in scan_records(self, tree)? {
            if is_long_record(&value) {
                let descriptor = LongRecord::decode(&value)?;
                let last = chain_end(self, descriptor.first_page)?;
                self.free_page_run(descriptor.first_page, last)?;
            }
        }

        // Each level is already a sibling-linked run.
        let mut level_page = tree.root;
        for _ in (0..tree.depth).rev() {
            let (first_child, last) = {
                let buffer = self.pool().get(level_page, false, true)?;
                let header = buffer.header()?;
                let first_child = if matches!(header.page_type(), PageType::Index(_)) {
                    Some(KeyedPage::read(buffer.bytes())?.child_at(0)?)
                } else {
                    None
                };
                (first_child, chain_end(self, level_page)?)
            };
            self.free_page_run(level_page, last)?;
            match first_child {
                Some(child) => level_page = child,
                None => break,
            }
        }

        let mut directory = self.directory_tree()?;
        let mut writer = TreeWriter::new(self, &mut directory);
        writer.remove(&encode_text(&tree.name))?;
        Ok(())
    }
}

fn chain_end(volume: &Volume, start: u64) -> Result<u64> {
    let mut page = start;
    loop {
        let buffer = volume.pool().get(page, false, true)?;
        let next = buffer.header()?.right_sibling();
        if next == 0 {
            return Ok(page);
        }
        page = next;
    }
}

/// Descend to the leaf that owns `key`, returning the raw stored value
/// region (possibly an MVV overlay or a long-record descriptor).
pub fn lookup_raw(volume: &Volume, tree: &Tree, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut page_address = tree.root;
    for level in (0..tree.depth).rev() {
        let buffer = volume.pool().get(page_address, false, true)?;
        let page = KeyedPage::read(buffer.bytes())?;
        if level == 0 {
            let fr = page.find(key)?;
            return Ok(fr.found.then(|| page.value_at(fr.slot).map(<[u8]>::to_vec)).transpose()?);
        }
        let fr = page.find(key)?;
        let slot = if fr.found {
            fr.slot
        } else {
            ensure!(
                fr.slot > 0,
                ErrorKind::CorruptVolume(format!(
                    "index page {} has no entry at or below the probe key",
                    page_address
                ))
            );
            fr.slot - 1
        };
        page_address = page.child_at(slot)?;
    }
    unreachable!("descent always ends at level 0");
}

/// Resolve the value visible at `snapshot`, following long-record chains.
pub fn fetch(
    volume: &Volume,
    tree: &Tree,
    key: &[u8],
    snapshot: u64,
    oracle: &dyn TransactionIndex,
) -> Result<Option<Vec<u8>>> {
    let Some(region) = lookup_raw(volume, tree, key)? else {
        return Ok(None);
    };
    if is_long_record(&region) {
        let descriptor = LongRecord::decode(&region)?;
        return Ok(Some(read_long_record(volume, &descriptor)?));
    }
    Ok(mvcc::value::visible_at(&region, snapshot, oracle)?.map(<[u8]>::to_vec))
}

/// Every `(key, value)` record of the tree, leaves left to right.
pub fn scan_records(volume: &Volume, tree: &Tree) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut page_address = tree.root;
    for _ in (1..tree.depth).rev() {
        let buffer = volume.pool().get(page_address, false, true)?;
        page_address = KeyedPage::read(buffer.bytes())?.child_at(0)?;
    }
    let mut records = Vec::new();
    while page_address != 0 {
        let buffer = volume.pool().get(page_address, false, true)?;
        let page = KeyedPage::read(buffer.bytes())?;
        let mut key = Vec::new();
        for slot in 0..page.keyblock_count() {
            page.next_key(slot, &mut key)?;
            records.push((key.clone(), page.value_at(slot)?.to_vec()));
        }
        page_address = page.header().right_sibling();
    }
    Ok(records)
}

pub fn read_long_record(volume: &Volume, descriptor: &LongRecord) -> Result<Vec<u8>> {
    descriptor.validate()?;
    let per_page = volume.page_size() - PAGE_HEADER_SIZE;
    let mut out = Vec::with_capacity(descriptor.total_size as usize);
    out.extend_from_slice(&descriptor.prefix);
    let mut remaining = descriptor.chain_size() as usize;
    let mut page_address = descriptor.first_page;
    while remaining > 0 {
        ensure!(
            page_address != 0,
            ErrorKind::CorruptVolume(format!(
                "long record chain ended {} bytes early",
                remaining
            ))
        );
        let buffer = volume.pool().get(page_address, false, true)?;
        let header = buffer.header()?;
        ensure!(
            header.page_type() == PageType::LongRecord,
            ErrorKind::CorruptVolume(format!(
                "page {} in a long record chain has type {}",
                page_address,
                header.page_type()
            ))
        );
        let chunk = remaining.min(per_page);
        out.extend_from_slice(&buffer.bytes()[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + chunk]);
        remaining -= chunk;
        page_address = header.right_sibling();
    }
    Ok(out)
}

fn write_long_record(volume: &Volume, value: &[u8]) -> Result<LongRecord> {
    let per_page = volume.page_size() - PAGE_HEADER_SIZE;
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&value[..8]);
    let rest = &value[8..];

    let page_count = rest.len().div_ceil(per_page).max(1);
    let mut chain = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        chain.push(volume.allocate_page()?);
    }
    let ts = volume.timestamps().update();
    for (index, chunk) in rest.chunks(per_page).enumerate() {
        let page_address = chain[index];
        let mut buffer = volume.pool().get(page_address, true, true)?;
        init_page(buffer.bytes_mut()?, PageType::LongRecord, page_address, ts)?;
        let next = chain.get(index + 1).copied().unwrap_or(0);
        let bytes = buffer.bytes_mut()?;
        PageHeader::from_bytes_mut(bytes)?.set_right_sibling(next);
        bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
    }
    Ok(LongRecord::new(value.len() as u64, chain[0], prefix))
}

/// Write access to one tree. Holds no claims between operations.
pub struct TreeWriter<'v> {
    volume: &'v Volume,
    tree: &'v mut Tree,
}

impl<'v> TreeWriter<'v> {
    pub fn new(volume: &'v Volume, tree: &'v mut Tree) -> Self {
        Self { volume, tree }
    }

    pub fn tree(&self) -> &Tree {
        self.tree
    }

    /// Store a primordial value, spilling oversized values to a long-record
    /// chain. Replaces any existing value for the key.
    pub fn store(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.volume.suspension().wait_while_suspended();
        if value.len() > self.volume.max_inline_value() {
            let descriptor = write_long_record(self.volume, value)?;
            return self.store_bytes(key, &descriptor.encode());
        }
        if mvcc::value::needs_wrapping(value) {
            // A reserved leading byte cannot be stored raw; re-encode the
            // value as a single-entry overlay at the primordial version.
            return self.store_bytes(key, &primordial_wrapped(value));
        }
        self.store_bytes(key, value)
    }

    /// Append a version to the key's value region. `None` writes the
    /// deletion sentinel.
    pub fn store_version(&mut self, key: &[u8], version: u64, value: Option<&[u8]>) -> Result<()> {
        self.volume.suspension().wait_while_suspended();
        let existing = lookup_raw(self.volume, self.tree, key)?;
        if let Some(existing) = &existing {
            ensure!(
                !is_long_record(existing),
                ErrorKind::StateViolation(
                    "long-record values cannot carry a version overlay".to_string()
                )
            );
        }
        let body = value.unwrap_or(&[TYPE_ANTIVALUE]);
        let region = mvcc::value::append_version(existing.as_deref(), version, body)?;
        ensure!(
            region.len() <= self.volume.max_inline_value(),
            ErrorKind::StateViolation(format!(
                "version overlay for the key grew to {} bytes, past the inline limit {}",
                region.len(),
                self.volume.max_inline_value()
            ))
        );
        self.store_bytes(key, &region)
    }

    /// Physically remove the key from its leaf. Returns whether it existed.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.volume.suspension().wait_while_suspended();
        let mut path = self.descend(key)?;
        let (leaf, _) = path.last_mut().expect("descent yields at least the root");
        let mut page = KeyedPageMut::write(leaf.bytes_mut()?)?;
        let fr = page.as_read().find(key)?;
        if !fr.found {
            return Ok(false);
        }
        if is_long_record(page.as_read().value_at(fr.slot)?) {
            let descriptor = LongRecord::decode(page.as_read().value_at(fr.slot)?)?;
            page.remove(fr.slot)?;
            drop(page);
            drop(path);
            let last = chain_end(self.volume, descriptor.first_page)?;
            self.volume.free_page_run(descriptor.first_page, last)?;
            return Ok(true);
        }
        page.remove(fr.slot)?;
        Ok(true)
    }

    fn store_bytes(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut path = self.descend(key)?;

        // Try the leaf first; only on NeedsSplit does the path matter.
        let outcome = {
            let (leaf, _) = path.last_mut().expect("descent yields at least the root");
            let mut page = KeyedPageMut::write(leaf.bytes_mut()?)?;
            let outcome = page.insert(key, value)?;
            page.header_mut().set_timestamp(self.volume.timestamps().update());
            outcome
        };
        if outcome == InsertOutcome::Done {
            return Ok(());
        }

        let mut pending_key = key.to_vec();
        let mut pending_value = value.to_vec();
        let mut level = 0usize;
        loop {
            let (buffer, _) = path.last_mut().expect("split propagation exhausted the path");
            let page_type = buffer.header()?.page_type();
            let new_address = self.volume.allocate_page()?;
            let ts = self.volume.timestamps().update();
            let promoted = {
                let mut right_buffer = self.volume.pool().get(new_address, true, true)?;
                init_page(right_buffer.bytes_mut()?, page_type, new_address, ts)?;
                let mut left = KeyedPageMut::write(buffer.bytes_mut()?)?;
                let mut right = KeyedPageMut::write(right_buffer.bytes_mut()?)?;
                let promoted = left.split_into(&mut right, Some((&pending_key, &pending_value)))?;
                left.header_mut().set_timestamp(ts);
                right.header_mut().set_timestamp(ts);
                promoted
            };

            let (split_page, _) = path.pop().expect("path is non-empty");
            let split_address = split_page.page_address();
            drop(split_page);

            match path.last_mut() {
                Some((parent, _)) => {
                    let mut parent_page = KeyedPageMut::write(parent.bytes_mut()?)?;
                    let outcome = parent_page.insert(&promoted, &new_address.to_be_bytes())?;
                    parent_page.header_mut().set_timestamp(self.volume.timestamps().update());
                    if outcome == InsertOutcome::Done {
                        return Ok(());
                    }
                    pending_key = promoted;
                    pending_value = new_address.to_be_bytes().to_vec();
                    level += 1;
                }
                None => {
                    // Root split: the tree grows a level.
                    ensure!(
                        self.tree.depth < MAX_TREE_DEPTH,
                        ErrorKind::CorruptVolume(format!(
                            "tree {} exceeds the maximum depth {}",
                            self.tree.name, MAX_TREE_DEPTH
                        ))
                    );
                    let new_root = self.volume.allocate_page()?;
                    let ts = self.volume.timestamps().update();
                    let mut root_buffer = self.volume.pool().get(new_root, true, true)?;
                    init_page(
                        root_buffer.bytes_mut()?,
                        PageType::Index((level + 1) as u8),
                        new_root,
                        ts,
                    )?;
                    let mut root_page = KeyedPageMut::write(root_buffer.bytes_mut()?)?;
                    ensure!(
                        root_page.insert(b"", &split_address.to_be_bytes())? == InsertOutcome::Done,
                        "fresh root rejected its left edge"
                    );
                    ensure!(
                        root_page.insert(&promoted, &new_address.to_be_bytes())? == InsertOutcome::Done,
                        "fresh root rejected its promoted key"
                    );
                    drop(root_page);
                    drop(root_buffer);
                    self.tree.root = new_root;
                    self.tree.depth += 1;
                    self.persist_root()?;
                    return Ok(());
                }
            }
        }
    }

    fn persist_root(&mut self) -> Result<()> {
        if self.tree.is_directory {
            let (root, depth) = (self.tree.root, self.tree.depth);
            self.volume.update_head(|head| head.set_directory(root, depth))?;
            return Ok(());
        }
        let entry = encode_directory_entry(self.tree.root, self.tree.depth, self.tree.handle);
        let mut directory = self.volume.directory_tree()?;
        let mut writer = TreeWriter::new(self.volume, &mut directory);
        writer.store(&encode_text(&self.tree.name), &entry)
    }

    /// Claim the path from the root to the owning leaf, exclusively, parent
    /// before child. The returned vector is ordered root first.
    fn descend(&self, key: &[u8]) -> Result<Vec<(Buffer, usize)>> {
        ensure!(
            !self.volume.is_read_only(),
            ErrorKind::StateViolation(format!("volume {} is read-only", self.volume.name()))
        );
        let mut path = Vec::with_capacity(self.tree.depth);
        let mut page_address = self.tree.root;
        for level in (0..self.tree.depth).rev() {
            let buffer = self.volume.pool().get(page_address, true, true)?;
            if level > 0 {
                let page = KeyedPage::read(buffer.bytes())?;
                let fr = page.find(key)?;
                let slot = if fr.found {
                    fr.slot
                } else {
                    ensure!(
                        fr.slot > 0,
                        ErrorKind::CorruptVolume(format!(
                            "index page {} has no entry at or below the probe key",
                            page_address
                        ))
                    );
                    fr.slot - 1
                };
                page_address = page.child_at(slot)?;
            }
            path.push((buffer, level));
        }
        Ok(path)
    }
}

fn primordial_wrapped(value: &[u8]) -> Vec<u8> {
    use crate::encoding::varint::encode_varint;
    let mut out = Vec::with_capacity(value.len() + 11);
    out.push(mvcc::TYPE_MVV);
    let mut scratch = [0u8; 9];
    let n = encode_varint(mvcc::PRIMORDIAL_VALUE_VERSION, &mut scratch);
    out.extend_from_slice(&scratch[..n]);
    let n = encode_varint(value.len() as u64, &mut scratch);
    out.extend_from_slice(&scratch[..n]);
    out.extend_from_slice(value);
    out
}
