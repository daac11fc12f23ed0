//! # Multi-Version Values
//!
//! A value region on a data page is either a primordial byte string or a
//! multi-version overlay holding one body per writing version. Readers pick
//! the newest version visible to their snapshot; the cleanup path prunes
//! versions no snapshot can reach any more.
//!
//! ## Encoding
//!
//! ```text
//! primordial:   <raw value bytes>
//! multiversion: 0xFE { version: varint, length: varint, body: length bytes }*
//! ```
//!
//! The tag byte distinguishes the two forms in O(1). A primordial value whose
//! first byte collides with a reserved tag (0xFD, 0xFE, 0xFF) is wrapped as a
//! single version-0 entry so the distinction stays unambiguous.
//!
//! A version body of exactly one 0xFF byte is the ANTI_VALUE sentinel: the
//! key was deleted at that version. `PRIMORDIAL_VALUE_VERSION` (0) is the
//! bottom version that predates the multi-version overlay.
//!
//! ## Ordering Invariant
//!
//! Entries appear oldest first and the newest entry carries a version handle
//! greater than every prior entry for the value. [`value::append_version`]
//! enforces this at write time and the page verifier checks it on disk.
//!
//! ## Visibility
//!
//! Whether a version is visible to a snapshot depends on the transaction
//! index, an external collaborator reduced here to the [`TransactionIndex`]
//! trait. Pruning consults it through [`CommitStatus`]; entries whose writer
//! is still unresolved are never touched.

pub mod prune;
pub mod value;

pub use prune::{Pruned, prune};
pub use value::{MvvSummary, append_version, is_primordial, summarize, visible_at, visit_versions};

/// Tag byte opening a multi-version value region.
pub const TYPE_MVV: u8 = 0xFE;

/// Single-byte version body meaning "deleted at this version".
pub const TYPE_ANTIVALUE: u8 = 0xFF;

/// The version handle of primordial (pre-overlay) state.
pub const PRIMORDIAL_VALUE_VERSION: u64 = 0;

/// Commit state of a version handle as known to the transaction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Committed,
    Aborted,
    /// Still running, or the index no longer remembers. Never pruned.
    Unknown,
}

/// The transaction-index surface the value layer consumes.
pub trait TransactionIndex {
    fn committed(&self, version: u64) -> CommitStatus;

    /// Forget per-version bookkeeping for aborted transactions whose effects
    /// were fully pruned since `since_timestamp`. Returns the cleared count.
    fn reset_mvv_counts(&self, since_timestamp: u64) -> usize;
}

/// A transaction index that treats every version as committed. Useful for
/// volumes written without concurrent transactions and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllCommitted;

impl TransactionIndex for AllCommitted {
    fn committed(&self, _version: u64) -> CommitStatus {
        CommitStatus::Committed
    }

    fn reset_mvv_counts(&self, _since_timestamp: u64) -> usize {
        0
    }
}
