//! # Volumes
//!
//! A volume owns a page-address space `[0, next_available)`. Page 0 is the
//! head: a fixed payload directly after the page header recording the
//! directory tree, the garbage chain, and the allocation high-water mark.
//!
//! ## Head Payload (after the 32-byte page header)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------
//! 0       8     magic "VELLUM01"
//! 8       4     version
//! 12      4     page_size
//! 16      8     next_available
//! 24      8     directory_root
//! 32      8     garbage_root
//! 40      8     volume_id
//! 48      8     created_ms
//! 56      4     directory_depth
//! 60      4     next_tree_handle
//! ```
//!
//! ## Allocation
//!
//! New pages come from the garbage chain when it has any, otherwise from
//! `next_available`. Freed pages go back as `{left, right}` runs pushed onto
//! the garbage chain. Both paths mutate the head under its exclusive claim,
//! which is the only synchronization the head needs.
//!
//! ## Update Suspension
//!
//! The engine-wide quiesce flag lives here. Setting it does not interrupt
//! in-flight mutations; the verifier sleeps a settle interval after raising
//! it so that mutations that observed the unsuspended flag can finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use eyre::{Result, ensure};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::PAGE_HEADER_SIZE;
use crate::error::ErrorKind;
use crate::page::garbage::{GarbageEntry, GarbagePage, GarbagePageMut};
use crate::page::{PageHeader, PageType, init_page};
use crate::pool::BufferPool;

pub const VOLUME_MAGIC: [u8; 8] = *b"VELLUM01";
pub const VOLUME_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VolumeHead {
    magic: [u8; 8],
    version: u32,
    page_size: u32,
    next_available: u64,
    directory_root: u64,
    garbage_root: u64,
    volume_id: u64,
    created_ms: u64,
    directory_depth: u32,
    next_tree_handle: u32,
}

const _: () = assert!(size_of::<VolumeHead>() == 64);

impl VolumeHead {
    pub fn from_bytes(page: &[u8]) -> Result<&Self> {
        let end = PAGE_HEADER_SIZE + size_of::<Self>();
        ensure!(page.len() >= end, "page too small for a volume head");
        let head = Self::ref_from_bytes(&page[PAGE_HEADER_SIZE..end])
            .map_err(|e| eyre::eyre!("failed to read VolumeHead: {:?}", e))?;
        ensure!(
            head.magic == VOLUME_MAGIC,
            ErrorKind::CorruptVolume("volume head magic mismatch".to_string())
        );
        Ok(head)
    }

    pub fn from_bytes_mut(page: &mut [u8]) -> Result<&mut Self> {
        let end = PAGE_HEADER_SIZE + size_of::<Self>();
        ensure!(page.len() >= end, "page too small for a volume head");
        Self::mut_from_bytes(&mut page[PAGE_HEADER_SIZE..end])
            .map_err(|e| eyre::eyre!("failed to read VolumeHead: {:?}", e))
    }

    pub fn next_available(&self) -> u64 {
        self.next_available
    }

    pub fn directory_root(&self) -> u64 {
        self.directory_root
    }

    pub fn directory_depth(&self) -> usize {
        self.directory_depth as usize
    }

    pub fn garbage_root(&self) -> u64 {
        self.garbage_root
    }

    pub fn page_size(&self) -> usize {
        self.page_size as usize
    }

    pub fn volume_id(&self) -> u64 {
        self.volume_id
    }

    pub fn set_directory(&mut self, root: u64, depth: usize) {
        self.directory_root = root;
        self.directory_depth = depth as u32;
    }
}

/// Plain-value snapshot of the head, for callers that should not hold the
/// head claim.
#[derive(Debug, Clone, Copy)]
pub struct HeadInfo {
    pub page_size: usize,
    pub next_available: u64,
    pub directory_root: u64,
    pub directory_depth: usize,
    pub garbage_root: u64,
    pub volume_id: u64,
}

/// Monotonic timestamp source shared by every mutator of a volume.
#[derive(Debug)]
pub struct TimestampAllocator {
    next: AtomicU64,
}

impl TimestampAllocator {
    pub fn new(start: u64) -> Self {
        Self { next: AtomicU64::new(start.max(1)) }
    }

    pub fn update(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Engine-wide quiesce flag. Raising it does not interrupt in-flight
/// mutations; the verifier sleeps its settle interval after raising so that
/// mutations that observed the unsuspended flag have completed.
#[derive(Debug, Default)]
pub struct UpdateSuspension {
    suspended: AtomicBool,
}

impl UpdateSuspension {
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    /// Mutators call this at their suspension points.
    pub fn wait_while_suspended(&self) {
        while self.is_suspended() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

pub struct Volume {
    name: String,
    page_size: usize,
    read_only: bool,
    pool: Arc<dyn BufferPool>,
    timestamps: TimestampAllocator,
    suspension: Arc<UpdateSuspension>,
    tree_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl Volume {
    /// Format a fresh volume on `pool`: head page plus an empty directory
    /// tree rooted at page 1.
    pub fn create(name: &str, volume_id: u64, pool: Arc<dyn BufferPool>) -> Result<Volume> {
        let page_size = pool.page_size();
        let timestamps = TimestampAllocator::new(1);
        {
            let ts = timestamps.update();
            let mut head = pool.get(0, true, true)?;
            init_page(head.bytes_mut()?, PageType::Head, 0, ts)?;
            let bytes = head.bytes_mut()?;
            let end = PAGE_HEADER_SIZE + size_of::<VolumeHead>();
            let payload = VolumeHead {
                magic: VOLUME_MAGIC,
                version: VOLUME_VERSION,
                page_size: page_size as u32,
                next_available: 2,
                directory_root: 1,
                garbage_root: 0,
                volume_id,
                created_ms: now_ms(),
                directory_depth: 1,
                next_tree_handle: 1,
            };
            bytes[PAGE_HEADER_SIZE..end].copy_from_slice(payload.as_bytes());

            let mut dir_root = pool.get(1, true, true)?;
            init_page(dir_root.bytes_mut()?, PageType::Data, 1, ts)?;
        }
        Ok(Volume {
            name: name.to_string(),
            page_size,
            read_only: false,
            pool,
            timestamps,
            suspension: Arc::new(UpdateSuspension::default()),
            tree_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Open an existing volume, validating the head.
    pub fn open(name: &str, pool: Arc<dyn BufferPool>, read_only: bool) -> Result<Volume> {
        let page_size = pool.page_size();
        let start_timestamp;
        {
            let head = pool.get(0, false, true)?;
            let header = head.header()?;
            ensure!(
                header.page_type() == PageType::Head,
                ErrorKind::CorruptVolume(format!("page 0 has type {}", header.page_type()))
            );
            let payload = VolumeHead::from_bytes(head.bytes())?;
            ensure!(
                payload.page_size() == page_size,
                ErrorKind::CorruptVolume(format!(
                    "volume declares page size {} but the pool serves {}",
                    payload.page_size(),
                    page_size
                ))
            );
            start_timestamp = header.timestamp() + 1;
        }
        Ok(Volume {
            name: name.to_string(),
            page_size,
            read_only,
            pool,
            timestamps: TimestampAllocator::new(start_timestamp),
            suspension: Arc::new(UpdateSuspension::default()),
            tree_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn pool(&self) -> &dyn BufferPool {
        self.pool.as_ref()
    }

    pub fn timestamps(&self) -> &TimestampAllocator {
        &self.timestamps
    }

    pub fn suspension(&self) -> &Arc<UpdateSuspension> {
        &self.suspension
    }

    /// Largest value stored inline in a data page; anything longer goes to a
    /// long-record chain. Bounded so any single record fits a page even next
    /// to a maximally long key.
    pub fn max_inline_value(&self) -> usize {
        (self.page_size / 2).min(self.page_size - 560)
    }

    pub fn head(&self) -> Result<HeadInfo> {
        let head = self.pool.get(0, false, true)?;
        let payload = VolumeHead::from_bytes(head.bytes())?;
        Ok(HeadInfo {
            page_size: payload.page_size(),
            next_available: payload.next_available(),
            directory_root: payload.directory_root(),
            directory_depth: payload.directory_depth(),
            garbage_root: payload.garbage_root(),
            volume_id: payload.volume_id(),
        })
    }

    /// Mutate the head payload under its exclusive claim.
    pub fn update_head<F, R>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut VolumeHead) -> R,
    {
        ensure!(
            !self.read_only,
            ErrorKind::StateViolation(format!("volume {} is read-only", self.name))
        );
        let ts = self.timestamps.update();
        let mut head = self.pool.get(0, true, true)?;
        let bytes = head.bytes_mut()?;
        let result = mutate(VolumeHead::from_bytes_mut(bytes)?);
        PageHeader::from_bytes_mut(bytes)?.set_timestamp(ts);
        Ok(result)
    }

    /// Claim a fresh tree handle.
    pub fn allocate_tree_handle(&self) -> Result<u32> {
        self.update_head(|head| {
            let handle = head.next_tree_handle;
            head.next_tree_handle += 1;
            handle
        })
    }

    /// Per-tree lock used by structural operations and the verifier.
    pub fn tree_lock(&self, tree_name: &str) -> Arc<RwLock<()>> {
        Arc::clone(
            self.tree_locks
                .lock()
                .entry(tree_name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Allocate one page: pop from the garbage chain, else extend the
    /// address space. The returned page keeps stale contents; the caller
    /// formats it.
    pub fn allocate_page(&self) -> Result<u64> {
        ensure!(
            !self.read_only,
            ErrorKind::StateViolation(format!("volume {} is read-only", self.name))
        );
        let ts = self.timestamps.update();
        let mut head_buffer = self.pool.get(0, true, true)?;
        let head_bytes = head_buffer.bytes_mut()?;
        let garbage_root = VolumeHead::from_bytes(head_bytes)?.garbage_root();

        if garbage_root != 0 {
            let mut garbage_buffer = self.pool.get(garbage_root, true, true)?;
            let mut garbage = GarbagePageMut::write(garbage_buffer.bytes_mut()?)?;
            if let Some(entry) = garbage.as_read().first_entry() {
                let allocated = entry.left_page;
                if entry.left_page == entry.right_page {
                    garbage.pop();
                } else {
                    // The run shrinks by its head; the next page of the run
                    // is found through the sibling chain.
                    let next = {
                        let run_head = self.pool.get(entry.left_page, false, true)?;
                        run_head.header()?.right_sibling()
                    };
                    if next == 0 {
                        garbage.pop();
                    } else {
                        garbage.replace_first(GarbageEntry {
                            left_page: next,
                            right_page: entry.right_page,
                        })?;
                    }
                }
                PageHeader::from_bytes_mut(head_bytes)?.set_timestamp(ts);
                return Ok(allocated);
            }
            // The garbage page itself is the last free page of this link.
            let next_root = garbage.as_read().header().right_sibling();
            drop(garbage);
            drop(garbage_buffer);
            let payload = VolumeHead::from_bytes_mut(head_bytes)?;
            payload.garbage_root = next_root;
            PageHeader::from_bytes_mut(head_bytes)?.set_timestamp(ts);
            return Ok(garbage_root);
        }

        let payload = VolumeHead::from_bytes_mut(head_bytes)?;
        let allocated = payload.next_available;
        payload.next_available += 1;
        PageHeader::from_bytes_mut(head_bytes)?.set_timestamp(ts);
        Ok(allocated)
    }

    /// Thread an inclusive run of pages `[left, right]` (linked through
    /// `right_sibling`) back onto the garbage chain.
    pub fn free_page_run(&self, left: u64, right: u64) -> Result<()> {
        ensure!(
            !self.read_only,
            ErrorKind::StateViolation(format!("volume {} is read-only", self.name))
        );
        ensure!(left != 0 && right != 0, "cannot free page 0");
        let ts = self.timestamps.update();
        let mut head_buffer = self.pool.get(0, true, true)?;
        let head_bytes = head_buffer.bytes_mut()?;
        let garbage_root = VolumeHead::from_bytes(head_bytes)?.garbage_root();

        if garbage_root != 0 {
            let mut garbage_buffer = self.pool.get(garbage_root, true, true)?;
            let mut garbage = GarbagePageMut::write(garbage_buffer.bytes_mut()?)?;
            if garbage.has_room() {
                garbage.push(GarbageEntry { left_page: left, right_page: right })?;
                PageHeader::from_bytes_mut(head_bytes)?.set_timestamp(ts);
                return Ok(());
            }
        }

        // Chain a new garbage page in front.
        let payload = VolumeHead::from_bytes_mut(head_bytes)?;
        let new_garbage = payload.next_available;
        payload.next_available += 1;
        let old_root = payload.garbage_root;
        payload.garbage_root = new_garbage;
        PageHeader::from_bytes_mut(head_bytes)?.set_timestamp(ts);

        let mut garbage_buffer = self.pool.get(new_garbage, true, true)?;
        init_page(garbage_buffer.bytes_mut()?, PageType::Garbage, new_garbage, ts)?;
        PageHeader::from_bytes_mut(garbage_buffer.bytes_mut()?)?.set_right_sibling(old_root);
        let mut garbage = GarbagePageMut::write(garbage_buffer.bytes_mut()?)?;
        garbage.push(GarbageEntry { left_page: left, right_page: right })?;
        Ok(())
    }

    /// Count the pages on the garbage chain, following both the chain of
    /// garbage pages and each free run.
    pub fn garbage_page_count(&self) -> Result<u64> {
        let mut count = 0u64;
        let mut garbage_address = self.head()?.garbage_root;
        while garbage_address != 0 {
            let buffer = self.pool.get(garbage_address, false, true)?;
            let garbage = GarbagePage::read(buffer.bytes())?;
            count += 1;
            for entry in garbage.entries() {
                let mut page = entry.left_page;
                while page != 0 {
                    count += 1;
                    if page == entry.right_page {
                        break;
                    }
                    let run_buffer = self.pool.get(page, false, true)?;
                    page = run_buffer.header()?.right_sibling();
                }
            }
            garbage_address = garbage.header().right_sibling();
        }
        Ok(count)
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}
