//! # Buffer Pool Surface
//!
//! The buffer pool proper (cache, eviction, journal-backed loads) is an
//! external collaborator. This module defines the minimum surface the core
//! consumes, plus two small pools that make the core operable on its own:
//!
//! - [`MemoryPool`]: page frames in memory, used by tests and by tree
//!   construction against a fresh volume.
//! - [`MmapVolumePool`]: a read-only memory-mapped volume file, used by the
//!   CLI tools to verify existing volumes.
//!
//! ## Claims
//!
//! Every page access holds a claim for the lifetime of the returned
//! [`Buffer`]: `Shared` for reads (may coexist), `Exclusive` for writes. A
//! claim that cannot be granted within the pool's timeout fails with the
//! `InUse` error kind. The pools here implement claims directly as
//! `parking_lot` reader/writer locks held by the buffer guard, so a holder
//! must not re-claim a page it already holds exclusively.
//!
//! A real buffer pool is free to implement reentrant claims; the core only
//! requires that claims block concurrent writers and that `wait = false`
//! returns `InUse` immediately instead of blocking.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, ensure};
use hashbrown::HashMap;
use memmap2::Mmap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::error::ErrorKind;
use crate::page::{PageHeader, validate_page_size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    Shared,
    Exclusive,
}

enum Claim {
    Shared(ArcRwLockReadGuard<RawRwLock, Vec<u8>>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, Vec<u8>>),
    /// A read-only slice of a mapped volume file. No locking: the mapping is
    /// immutable for the life of the pool.
    Snapshot { map: Arc<Mmap>, offset: usize, len: usize },
}

/// A claimed page. The claim is released when the buffer drops.
pub struct Buffer {
    page_address: u64,
    claim: Claim,
}

impl Buffer {
    pub fn page_address(&self) -> u64 {
        self.page_address
    }

    pub fn mode(&self) -> ClaimMode {
        match self.claim {
            Claim::Exclusive(_) => ClaimMode::Exclusive,
            _ => ClaimMode::Shared,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.claim {
            Claim::Shared(guard) => guard,
            Claim::Exclusive(guard) => guard,
            Claim::Snapshot { map, offset, len } => &map[*offset..*offset + *len],
        }
    }

    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.claim {
            Claim::Exclusive(guard) => Ok(guard.as_mut_slice()),
            _ => Err(eyre::Report::new(ErrorKind::StateViolation(format!(
                "page {} is claimed shared, not exclusive",
                self.page_address
            )))),
        }
    }

    pub fn header(&self) -> Result<&PageHeader> {
        PageHeader::from_bytes(self.bytes())
    }

    /// Explicit release for call sites where the claim hand-off matters.
    pub fn release(self) {}
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("page_address", &self.page_address)
            .field("mode", &self.mode())
            .finish()
    }
}

/// The page-claim surface consumed by the tree, the verifier, and the tools.
/// A pool serves exactly one volume.
pub trait BufferPool: Send + Sync {
    fn page_size(&self) -> usize;

    /// Claim a page. `for_write` requests an exclusive claim (and, in pools
    /// that allocate lazily, materializes an absent page). `wait = false`
    /// fails with `InUse` instead of blocking.
    fn get(&self, page_address: u64, for_write: bool, wait: bool) -> Result<Buffer>;

    /// Highest page address the pool can serve, exclusive.
    fn page_limit(&self) -> u64;
}

/// An index hole: a page reachable through a right-sibling pointer at some
/// level but missing from the index level above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHole {
    pub tree_handle: u32,
    pub page_address: u64,
    pub level: usize,
}

/// The cleanup-worker surface: repairs are offered, never performed inline.
pub trait CleanupQueue {
    /// Returns false when the queue is full and the hole was not accepted.
    fn offer(&self, hole: IndexHole) -> bool;
}

/// A cleanup queue that accepts and remembers every offer. Enough for tests
/// and for the CLI, which reports the count.
#[derive(Debug, Default)]
pub struct RecordingCleanupQueue {
    holes: parking_lot::Mutex<Vec<IndexHole>>,
}

impl RecordingCleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<IndexHole> {
        std::mem::take(&mut self.holes.lock())
    }

    pub fn len(&self) -> usize {
        self.holes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.holes.lock().is_empty()
    }
}

impl CleanupQueue for RecordingCleanupQueue {
    fn offer(&self, hole: IndexHole) -> bool {
        self.holes.lock().push(hole);
        true
    }
}

/// In-memory page frames with real claim semantics.
pub struct MemoryPool {
    page_size: usize,
    frames: RwLock<HashMap<u64, Arc<RwLock<Vec<u8>>>>>,
    claim_timeout: Duration,
}

impl MemoryPool {
    pub fn new(page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;
        Ok(Self {
            page_size,
            frames: RwLock::new(HashMap::new()),
            claim_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    fn frame(&self, page_address: u64, create: bool) -> Result<Arc<RwLock<Vec<u8>>>> {
        if let Some(frame) = self.frames.read().get(&page_address) {
            return Ok(Arc::clone(frame));
        }
        ensure!(
            create,
            ErrorKind::Io(format!("page {} has never been written", page_address))
        );
        let mut frames = self.frames.write();
        let frame = frames
            .entry(page_address)
            .or_insert_with(|| Arc::new(RwLock::new(vec![0u8; self.page_size])));
        Ok(Arc::clone(frame))
    }
}

impl BufferPool for MemoryPool {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn get(&self, page_address: u64, for_write: bool, wait: bool) -> Result<Buffer> {
        let frame = self.frame(page_address, for_write)?;
        let claim = if for_write {
            let guard = if wait {
                frame.try_write_arc_for(self.claim_timeout)
            } else {
                frame.try_write_arc()
            };
            Claim::Exclusive(guard.ok_or_else(|| {
                eyre::Report::new(ErrorKind::InUse(format!("exclusive claim on page {}", page_address)))
            })?)
        } else {
            let guard = if wait {
                frame.try_read_arc_for(self.claim_timeout)
            } else {
                frame.try_read_arc()
            };
            Claim::Shared(guard.ok_or_else(|| {
                eyre::Report::new(ErrorKind::InUse(format!("shared claim on page {}", page_address)))
            })?)
        };
        Ok(Buffer { page_address, claim })
    }

    fn page_limit(&self) -> u64 {
        self.frames.read().keys().max().map_or(0, |max| max + 1)
    }
}

/// Read-only pool over a volume file, one page per `page_size` slice.
pub struct MmapVolumePool {
    page_size: usize,
    map: Arc<Mmap>,
}

impl MmapVolumePool {
    pub fn open(path: &std::path::Path, page_size: usize) -> Result<Self> {
        use eyre::WrapErr;
        validate_page_size(page_size)?;
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to open volume file {:?}", path))?;
        let map = unsafe {
            Mmap::map(&file).wrap_err_with(|| format!("failed to map volume file {:?}", path))?
        };
        ensure!(
            map.len() % page_size == 0,
            ErrorKind::CorruptVolume(format!(
                "volume file {:?} length {} is not a multiple of the page size {}",
                path,
                map.len(),
                page_size
            ))
        );
        Ok(Self { page_size, map: Arc::new(map) })
    }

    pub fn page_count(&self) -> u64 {
        (self.map.len() / self.page_size) as u64
    }
}

impl BufferPool for MmapVolumePool {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn get(&self, page_address: u64, for_write: bool, _wait: bool) -> Result<Buffer> {
        ensure!(
            !for_write,
            ErrorKind::StateViolation(format!(
                "page {} requested for write from a read-only volume",
                page_address
            ))
        );
        ensure!(
            page_address < self.page_count(),
            ErrorKind::Io(format!(
                "page {} is beyond the end of the volume ({} pages)",
                page_address,
                self.page_count()
            ))
        );
        let offset = page_address as usize * self.page_size;
        Ok(Buffer {
            page_address,
            claim: Claim::Snapshot { map: Arc::clone(&self.map), offset, len: self.page_size },
        })
    }

    fn page_limit(&self) -> u64 {
        self.page_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    #[test]
    fn write_then_read_round_trips() {
        let pool = MemoryPool::new(1024).unwrap();
        {
            let mut buffer = pool.get(3, true, true).unwrap();
            buffer.bytes_mut().unwrap()[100] = 0xAA;
        }
        let buffer = pool.get(3, false, true).unwrap();
        assert_eq!(buffer.bytes()[100], 0xAA);
    }

    #[test]
    fn reading_unwritten_page_fails() {
        let pool = MemoryPool::new(1024).unwrap();
        let err = pool.get(9, false, true).unwrap_err();
        assert!(matches!(kind_of(&err), Some(ErrorKind::Io(_))));
    }

    #[test]
    fn shared_claims_coexist() {
        let pool = MemoryPool::new(1024).unwrap();
        pool.get(1, true, true).unwrap().release();
        let a = pool.get(1, false, true).unwrap();
        let b = pool.get(1, false, true).unwrap();
        assert_eq!(a.page_address(), b.page_address());
    }

    #[test]
    fn exclusive_claim_conflicts_without_wait() {
        let pool = MemoryPool::new(1024).unwrap();
        pool.get(1, true, true).unwrap().release();
        let held = pool.get(1, false, true).unwrap();
        let err = pool.get(1, true, false).unwrap_err();
        assert!(matches!(kind_of(&err), Some(ErrorKind::InUse(_))));
        drop(held);
        assert!(pool.get(1, true, false).is_ok());
    }

    #[test]
    fn shared_buffer_refuses_mutation() {
        let pool = MemoryPool::new(1024).unwrap();
        pool.get(1, true, true).unwrap().release();
        let mut buffer = pool.get(1, false, true).unwrap();
        let err = buffer.bytes_mut().unwrap_err();
        assert!(matches!(kind_of(&err), Some(ErrorKind::StateViolation(_))));
    }

    #[test]
    fn page_limit_tracks_highest_written_page() {
        let pool = MemoryPool::new(1024).unwrap();
        assert_eq!(pool.page_limit(), 0);
        pool.get(0, true, true).unwrap().release();
        pool.get(7, true, true).unwrap().release();
        assert_eq!(pool.page_limit(), 8);
    }
}
