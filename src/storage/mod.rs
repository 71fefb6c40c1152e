//! # Storage Module
//!
//! This module provides the disk layer for scute's B+Tree indexes: chunked
//! binary files, slot allocation inside per-index regions, a bounded pool of
//! open file handles, and the IO sessions tree operations run under.
//!
//! ## Architecture Overview
//!
//! Node storage is organized as a sequence of **chunk files**. Every tree
//! node occupies one fixed-size slot, and each index owns one contiguous
//! **region** of slots per chunk it has grown into:
//!
//! ```text
//! index dir/
//! ├── index-0.bin        # chunk 0 (shared scope: regions of many indexes)
//! │   ├── [region: index 7 ]  slot slot slot slot ...
//! │   └── [region: index 12]  slot slot ...
//! ├── index-1.bin        # chunk 1, opened once chunk 0 hits its cap
//! └── ...
//! ```
//!
//! Regions grow in blocks of `growth_node_allocation_count` slots. A region
//! that is last in its file grows in place; one with a neighbor after it
//! grows by splicing zeroes into the middle of the file, which shifts every
//! following region and re-bases their recorded beginnings.
//!
//! Node pointers are **region-relative**: `(chunk, offset from the region
//! beginning)`. Shifting a region therefore never rewrites stored pointers,
//! only the header-tracked beginning.
//!
//! ## Layering
//!
//! ```text
//! UniqueTreeIndex (btree)
//!        │
//!   IoSession           immediate dispatch, or snapshot overlay + rollback
//!        │
//!   StorageManager      CachedStorageManager → ChunkedStorageManager
//!        │
//!   FileHandlerPool     bounded LRU of open ChunkFile handles
//!        │
//!   ChunkFile           mmap-backed file with splice and zero primitives
//! ```
//!
//! ## Lock Ordering
//!
//! Deadlock freedom relies on every path taking locks in one order:
//!
//! 1. the manager's allocation lock
//! 2. the pool's state mutex
//! 3. a chunk file's `RwLock`
//! 4. the header manager's mutex
//!
//! Region beginnings are resolved while holding the chunk file's lock so a
//! concurrent splice cannot slide a region out from under a reader.
//!
//! ## Module Organization
//!
//! - `pointer`: the 13-byte on-disk node/data pointer
//! - `chunk`: one mmap-backed chunk file (`ChunkFile`)
//! - `pool`: bounded file-handle pool with acquire timeout
//! - `header`: per-index root and region-beginning bookkeeping
//! - `manager`: slot allocation and node IO (`ChunkedStorageManager`)
//! - `cache`: LRU node-byte cache decorating any `StorageManager`
//! - `session`: per-operation IO scoping (`ImmediateSession`, `SnapshotSession`)

mod cache;
mod chunk;
mod header;
mod manager;
mod pointer;
mod pool;
mod session;

pub use cache::CachedStorageManager;
pub use chunk::ChunkFile;
pub use header::{HeaderManager, InMemoryHeaderManager, Location};
pub use manager::{ChunkedStorageManager, FileScope, StorageManager};
pub use pointer::{Pointer, PointerKind};
pub use pool::{FileGuard, FileHandlerPool};
pub use session::{ImmediateSession, IoSession, SessionStrategy, SnapshotSession};

/// Identifier an index is registered under; file names and header entries
/// key off it.
pub type IndexId = u32;

/// One node's slot bytes together with the pointer it lives at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    pub pointer: Pointer,
    pub bytes: Vec<u8>,
}

impl NodeData {
    pub fn new(pointer: Pointer, bytes: Vec<u8>) -> Self {
        Self { pointer, bytes }
    }
}
