//! # Scute - Embedded B+Tree Indexing Engine
//!
//! Scute is an embedded, disk-backed B+Tree engine: unique indexes from
//! typed keys to data pointers, stored in chunked binary files that many
//! indexes can share. It is the indexing layer of a database, not a
//! database itself; record storage, durability policy and query layers
//! belong to the caller.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use scute::btree::{Direction, LockRegistry, UniqueTreeIndex, U64Key};
//! use scute::config::EngineConfig;
//! use scute::storage::{
//!     ChunkedStorageManager, FileHandlerPool, FileScope, InMemoryHeaderManager,
//!     Pointer, SessionStrategy, StorageManager,
//! };
//!
//! let config = EngineConfig::default();
//! let headers = Arc::new(InMemoryHeaderManager::new());
//! let pool = Arc::new(FileHandlerPool::new(config.max_open_files, config.acquire_timeout));
//! let manager: Arc<dyn StorageManager> = Arc::new(ChunkedStorageManager::new(
//!     "./indexes", config, FileScope::Shared, headers, pool,
//! )?);
//!
//! let locks = LockRegistry::new();
//! let index: UniqueTreeIndex<U64Key> = UniqueTreeIndex::new(
//!     1, 128, Pointer::BYTES, manager, SessionStrategy::Immediate, &locks,
//! );
//!
//! index.add_index(42, Pointer::new_data(0, 0))?;
//! assert!(index.get_index(&42)?.is_some());
//! for entry in index.sorted_iter(Direction::Ascending)? {
//!     let (key, value) = entry?;
//!     println!("{key} -> {value}");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │   UniqueTreeIndex  (btree::index)    │   typed keys, per-index RwLock
//! ├──────────────────────────────────────┤
//! │   Tree operations  (btree)           │   descent, split, borrow, merge
//! ├──────────────────────────────────────┤
//! │   IoSession        (storage)         │   immediate or snapshot commit
//! ├──────────────────────────────────────┤
//! │   StorageManager   (storage)         │   slot allocation, node cache
//! ├──────────────────────────────────────┤
//! │   ChunkFile + FileHandlerPool        │   mmap-backed chunk files
//! └──────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! index_dir/
//! ├── index-0.bin          # chunk 0: regions of every index (shared scope)
//! ├── index-1.bin          # chunk 1, once chunk 0 reaches its byte cap
//! └── 7.index-0.bin        # per-index scope: index 7's own chunk files
//! ```
//!
//! ## Module Overview
//!
//! - [`btree`]: key codecs, node layout, tree operations, `UniqueTreeIndex`
//! - [`storage`]: pointers, chunk files, handle pool, managers, sessions
//! - [`config`]: engine tuning knobs (degree, growth, caps, cache)

pub mod btree;
pub mod config;
pub mod storage;

pub use btree::{Direction, LockRegistry, UniqueTreeIndex};
pub use config::EngineConfig;
pub use storage::{Pointer, SessionStrategy};
