//! # Vellum Configuration Constants
//!
//! This module centralizes the layout and limit constants shared by the page
//! codec, the journal codec, the verifier, and the alert aggregator. Constants
//! that depend on each other are co-located and the relationships are enforced
//! with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_HEADER_SIZE (32 bytes)
//!       │
//!       ├─> KEY_BLOCK_START (== PAGE_HEADER_SIZE; keyblocks begin here)
//!       │
//!       └─> MIN_PAGE_SIZE .. MAX_PAGE_SIZE (every size must leave room for
//!             at least one keyblock and one tail block)
//!
//! KEYBLOCK_LENGTH (4 bytes)
//!       │
//!       ├─> EBC_BITS / DB_BITS / TBL_BITS (must sum to 32)
//!       │
//!       ├─> MAX_KEY_LENGTH (bounded by the EBC field width)
//!       │
//!       └─> TBL_BITS must address every byte of MAX_PAGE_SIZE
//!
//! JOURNAL_OVERHEAD (16 bytes)
//!       │
//!       └─> every record length satisfies OVERHEAD <= length < block_size
//! ```

// ============================================================================
// PAGE LAYOUT
// ============================================================================

/// Size of the fixed page header present on every page.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Offset of the first keyblock. Keyblocks grow upward from here toward
/// `keyblock_end`; tail blocks occupy `[alloc, page_size)`.
pub const KEY_BLOCK_START: usize = PAGE_HEADER_SIZE;

/// Width of one keyblock entry.
pub const KEYBLOCK_LENGTH: usize = 4;

/// Bit widths of the three keyblock fields: elided byte count, discriminator
/// byte, and tail block offset.
pub const EBC_BITS: u32 = 9;
pub const DB_BITS: u32 = 8;
pub const TBL_BITS: u32 = 15;

/// Maximum encoded key length. Bounded by the EBC field: the elision of any
/// keyblock must be expressible, and an elision can be as long as the whole
/// preceding key.
pub const MAX_KEY_LENGTH: usize = (1 << EBC_BITS) - 1;

/// Fixed per-tail-block header: `{size: u16, klength: u16}`.
pub const TAILBLOCK_HEADER_SIZE: usize = 4;

/// Tail blocks are aligned to this boundary inside the tail region.
pub const TAILBLOCK_ALIGNMENT: usize = 4;

/// Supported page sizes. Uniform per volume, chosen at volume creation.
pub const MIN_PAGE_SIZE: usize = 1024;
pub const MAX_PAGE_SIZE: usize = 16384;

/// Largest page address the engine will follow. Anything above this in a
/// sibling or child pointer is structural corruption.
pub const MAX_VALID_PAGE_ADDR: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Size of one `{left_page, right_page}` entry in a garbage page body.
pub const GARBAGE_BLOCK_SIZE: usize = 16;

/// Size of the long-record descriptor stored in place of an oversized value:
/// `{tag, total_size: u64, first_page: u64, prefix: 8 bytes}`.
pub const LONGREC_SIZE: usize = 25;

/// Number of value bytes carried inline inside the long-record descriptor.
pub const LONGREC_PREFIX_SIZE: usize = 8;

const _: () = assert!(EBC_BITS + DB_BITS + TBL_BITS == 32, "keyblock fields must pack into a u32");
const _: () = assert!(
    (1 << TBL_BITS) >= MAX_PAGE_SIZE,
    "TBL must be able to address every byte of the largest page"
);
const _: () = assert!(MIN_PAGE_SIZE.is_power_of_two() && MAX_PAGE_SIZE.is_power_of_two());
const _: () = assert!(
    MIN_PAGE_SIZE >= PAGE_HEADER_SIZE + KEYBLOCK_LENGTH + TAILBLOCK_HEADER_SIZE + MAX_KEY_LENGTH,
    "the smallest page must hold at least one maximally long key"
);
const _: () = assert!(GARBAGE_BLOCK_SIZE == 2 * size_of::<u64>());

// ============================================================================
// TREE SHAPE
// ============================================================================

/// Deepest tree the walker will descend. A tree deeper than this is reported
/// as a fault rather than followed.
pub const MAX_TREE_DEPTH: usize = 20;

// ============================================================================
// VERIFIER LIMITS
// ============================================================================

/// Faults recorded per run. Visiting continues past this for counter accuracy
/// but no further faults accumulate.
pub const MAX_FAULTS: usize = 200;

/// Index holes enqueued for repair per tree.
pub const MAX_HOLES_TO_FIX: usize = 1000;

/// Right-sibling hops allowed while reconciling a level before the walk is
/// declared cyclic or unbounded.
pub const MAX_WALK_RIGHT: usize = 1000;

/// Pruning failures tolerated before the verifier stops requesting prunes.
pub const MAX_PRUNING_ERRORS: usize = 50;

/// How long the verifier sleeps after suspending updates, letting in-flight
/// mutations that observed the unsuspended flag complete.
pub const SETTLE_INTERVAL_MS: u64 = 3000;

// ============================================================================
// JOURNAL LAYOUT
// ============================================================================

/// Fixed per-record overhead: `{type: 2, length: 4, timestamp: 8, checksum: 2}`.
pub const JOURNAL_OVERHEAD: usize = 16;

/// Default journal block size. Each block maps to one file on disk.
pub const DEFAULT_BLOCK_SIZE: u64 = 1_000_000_000;

/// Width of the zero-padded decimal generation suffix in journal file names.
pub const JOURNAL_GENERATION_DIGITS: usize = 12;

// ============================================================================
// ALERT AGGREGATOR
// ============================================================================

pub const DEFAULT_HISTORY_LENGTH: usize = 10;
pub const MINIMUM_HISTORY_LENGTH: usize = 1;
pub const MAXIMUM_HISTORY_LENGTH: usize = 1000;

pub const DEFAULT_WARN_INTERVAL_MS: u64 = 600_000;
pub const MINIMUM_WARN_INTERVAL_MS: u64 = 1000;
pub const MAXIMUM_WARN_INTERVAL_MS: u64 = 86_400_000;

pub const DEFAULT_ERROR_INTERVAL_MS: u64 = 15_000;
pub const MINIMUM_ERROR_INTERVAL_MS: u64 = 1000;
pub const MAXIMUM_ERROR_INTERVAL_MS: u64 = 86_400_000;

/// Outbound notification queue depth. Posts beyond this are counted and
/// dropped rather than blocking the aggregator.
pub const NOTIFICATION_QUEUE_DEPTH: usize = 64;
