//! # Configuration Module
//!
//! Centralizes the engine's tunables. [`constants`] holds the raw values and
//! their compile-time relationship checks; [`EngineConfig`] bundles the
//! per-engine choices handed to the storage manager, handle pool, and index
//! construction.

pub mod constants;

pub use constants::*;

use std::time::Duration;

/// Engine-wide settings. One value is built at startup and shared by every
/// index the engine owns; per-index geometry (degree, key codec) is chosen
/// at index construction and only defaults come from here.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum children per internal node.
    pub degree: usize,
    /// Slots claimed per growth block.
    pub growth_node_allocation_count: usize,
    /// Byte cap per chunk file. `None` derives a cap from
    /// [`DEFAULT_CHUNK_SLOT_CAPACITY`] and the slot size in use.
    pub max_chunk_size: Option<u64>,
    /// Bounded handle pool capacity. [`UNLIMITED_OPEN_FILES`] disables the
    /// bound entirely.
    pub max_open_files: usize,
    /// How long a handle acquisition may wait for a pool seat.
    pub acquire_timeout: Duration,
    /// Node cache entries kept by the caching layer. Zero disables caching.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            degree: DEFAULT_TREE_DEGREE,
            growth_node_allocation_count: DEFAULT_GROWTH_NODE_ALLOCATION_COUNT,
            max_chunk_size: None,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            cache_capacity: DEFAULT_NODE_CACHE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_growth_allocation(mut self, count: usize) -> Self {
        self.growth_node_allocation_count = count;
        self
    }

    pub fn with_max_chunk_size(mut self, bytes: u64) -> Self {
        self.max_chunk_size = Some(bytes);
        self
    }

    pub fn with_max_open_files(mut self, max: usize) -> Self {
        self.max_open_files = max;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    /// Growth block size in bytes for a given padded slot size.
    pub fn growth_block_size(&self, slot_size: usize) -> usize {
        self.growth_node_allocation_count * slot_size
    }

    /// Effective chunk byte cap for a given padded slot size.
    pub fn chunk_capacity(&self, slot_size: usize) -> u64 {
        self.max_chunk_size
            .unwrap_or(DEFAULT_CHUNK_SLOT_CAPACITY.saturating_mul(slot_size as u64))
    }
}
