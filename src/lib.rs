//! # Vellum - Embedded Transactional Storage Core
//!
//! Vellum is the core of an embedded, page-based B+tree storage engine with
//! multi-version concurrency control and an append-only journal. It covers
//! the pieces that define the engine's durable contract:
//!
//! - the on-disk page layout and its structural invariants,
//! - the multi-version value overlay stored inside data pages,
//! - the integrity verifier that walks live trees,
//! - the journal format a recovery pass replays,
//! - the alert aggregator that rate-limits abnormal-event reporting.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │   Tools (icheck / jview)        [cli, bin]    │
//! ├──────────────────────┬────────────────────────┤
//! │  Integrity Verifier  │     Journal Codec      │
//! │      [verify]        │   [journal] + scanner  │
//! ├──────────────────────┴────────────────────────┤
//! │       Trees (store / fetch / split)  [tree]   │
//! ├──────────────────────┬────────────────────────┤
//! │  MVCC Value Overlay  │   Volumes, Garbage     │
//! │       [mvcc]         │       [volume]         │
//! ├──────────────────────┴────────────────────────┤
//! │   Page Codec: keyblocks, tails, long records  │
//! │                    [page]                     │
//! ├───────────────────────────────────────────────┤
//! │   Buffer Pool surface (claims)     [pool]     │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The buffer pool proper, the transaction index, and the cleanup worker are
//! external collaborators; [`pool`] and [`mvcc`] define the trait surfaces
//! the core consumes, plus in-crate implementations sufficient for tests and
//! the bundled tools.
//!
//! ## Page Vocabulary
//!
//! Every page is a fixed-size block (1 KiB to 16 KiB, uniform per volume)
//! with a 32-byte header carrying its address, right sibling, timestamp,
//! type, and the two watermarks of the keyed body. Keys are stored
//! front-compressed: each keyblock elides the prefix shared with its
//! predecessor and caches the first distinct byte for cheap comparisons.
//!
//! ## Concurrency Model
//!
//! Parallel threads in a host process. Every page access holds a shared or
//! exclusive claim from the buffer pool for the access's duration. The
//! verifier descends with claims held per level and released in edge order;
//! mutators consult an engine-wide suspension flag the verifier raises to
//! quiesce a volume.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vellum::encoding::key::encode_text;
//! use vellum::pool::MemoryPool;
//! use vellum::tree::TreeWriter;
//! use vellum::volume::Volume;
//!
//! let pool = Arc::new(MemoryPool::new(4096)?);
//! let volume = Volume::create("main", 1, pool)?;
//! let mut tree = volume.create_tree("accounts")?;
//! let mut writer = TreeWriter::new(&volume, &mut tree);
//! writer.store(&encode_text("alice"), b"1000")?;
//! ```

pub mod alert;
pub mod cli;
pub mod config;
pub mod encoding;
pub mod error;
pub mod journal;
pub mod mvcc;
pub mod page;
pub mod pattern;
pub mod pool;
pub mod tree;
pub mod verify;
pub mod volume;

pub use error::{ErrorKind, kind_of};

pub use alert::{AlertLevel, AlertMonitor, Event};
pub use cli::{IcheckCommand, JviewCommand, TreeSelector};
pub use journal::{JournalScanner, JournalWriter, ScanConfig};
pub use mvcc::{CommitStatus, TransactionIndex};
pub use page::{PageHeader, PageType};
pub use pool::{Buffer, BufferPool, ClaimMode, CleanupQueue, IndexHole, MemoryPool, MmapVolumePool};
pub use tree::{Tree, TreeWriter};
pub use verify::{Counters, Fault, IntegrityCheck, VerifyOptions, VolumePlan};
pub use volume::{Volume, VolumeHead};
