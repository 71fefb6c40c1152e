//! # Engine Configuration Constants
//!
//! Centralizes the tunable values of the index engine. Constants that depend
//! on each other are co-located and their relationships are enforced through
//! compile-time assertions.
//!
//! ```text
//! DEFAULT_TREE_DEGREE (4)
//!       │
//!       └─> min keys per non-root node = (degree - 1) / 2
//!             Degree must be >= MIN_TREE_DEGREE (3) or a split cannot
//!             leave both halves non-empty.
//!
//! DEFAULT_GROWTH_NODE_ALLOCATION_COUNT (10)
//!       │
//!       └─> growth block bytes = count * padded slot size
//!             The allocator claims and scans whole growth blocks; a count
//!             of zero would make every allocation a file extension.
//!
//! DEFAULT_MAX_OPEN_FILES (64)
//!       │
//!       └─> bounded handle pool capacity; acquisitions past it wait up to
//!           DEFAULT_ACQUIRE_TIMEOUT and then fail
//! ```

use std::time::Duration;

// ============================================================================
// TREE GEOMETRY
// ============================================================================

/// Default maximum number of children per internal node.
/// Max keys per node = degree - 1.
pub const DEFAULT_TREE_DEGREE: usize = 4;

/// Smallest usable degree. Below this a node split cannot produce two
/// non-empty halves plus a promoted key.
pub const MIN_TREE_DEGREE: usize = 3;

/// Node slots are padded to this alignment on disk.
pub const SLOT_ALIGNMENT: usize = 8;

const _: () = assert!(
    DEFAULT_TREE_DEGREE >= MIN_TREE_DEGREE,
    "DEFAULT_TREE_DEGREE must be at least MIN_TREE_DEGREE"
);

const _: () = assert!(
    SLOT_ALIGNMENT.is_power_of_two(),
    "SLOT_ALIGNMENT must be a power of two"
);

// ============================================================================
// ALLOCATION
// ============================================================================

/// Number of node slots claimed per growth block when an index needs more
/// space in a chunk.
pub const DEFAULT_GROWTH_NODE_ALLOCATION_COUNT: usize = 10;

/// Default chunk capacity in slots when no byte cap is configured.
/// Effectively unbounded for realistic indexes; allocation rolls over to
/// the next chunk number past this.
pub const DEFAULT_CHUNK_SLOT_CAPACITY: u64 = 1 << 30;

const _: () = assert!(
    DEFAULT_GROWTH_NODE_ALLOCATION_COUNT >= 1,
    "growth blocks must hold at least one slot"
);

// ============================================================================
// FILE HANDLES
// ============================================================================

/// Bounded handle pool capacity.
pub const DEFAULT_MAX_OPEN_FILES: usize = 64;

/// Pool capacity value meaning "never evict, never block".
pub const UNLIMITED_OPEN_FILES: usize = usize::MAX;

/// How long an acquisition waits for a free pool seat before failing.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const _: () = assert!(
    DEFAULT_MAX_OPEN_FILES >= 1,
    "the handle pool needs at least one seat"
);

// ============================================================================
// CACHING
// ============================================================================

/// Default node cache capacity (entries). Zero disables the caching layer.
pub const DEFAULT_NODE_CACHE_CAPACITY: usize = 1000;

// ============================================================================
// MAINTENANCE
// ============================================================================

/// Purge drains leftover keys in batches of `degree * this` per pass.
pub const PURGE_BATCH_MULTIPLIER: usize = 2;

const _: () = assert!(
    PURGE_BATCH_MULTIPLIER >= 1,
    "purge must make progress every pass"
);
