//! # Caching Storage Manager
//!
//! [`CachedStorageManager`] wraps any [`StorageManager`] with two maps: a
//! bounded LRU of `(index, pointer) → NodeData` and an unbounded per-index
//! root entry. Writes and updates populate the cache after the wrapped
//! manager succeeds, removals invalidate, reads fill on miss. Root entries
//! are populated only by root writes, so the cache can never hold a root
//! the store never accepted.
//!
//! Purely a performance layer: with the cache disabled the engine behaves
//! identically, just slower.

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::manager::StorageManager;
use super::pointer::Pointer;
use super::{IndexId, NodeData};

type CacheKey = (IndexId, Pointer);

struct CacheState {
    entries: HashMap<CacheKey, NodeData>,
    /// LRU order; front is the least recently touched key.
    order: Vec<CacheKey>,
    roots: HashMap<IndexId, NodeData>,
}

impl CacheState {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(position);
            self.order.push(key);
        }
    }

    fn insert(&mut self, capacity: usize, key: CacheKey, node: NodeData) {
        if capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.entries.insert(key, node);
            self.touch(&key);
            return;
        }
        while self.entries.len() >= capacity {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
        self.entries.insert(key, node);
        self.order.push(key);
    }

    fn invalidate(&mut self, key: &CacheKey) {
        if self.entries.remove(key).is_some() {
            if let Some(position) = self.order.iter().position(|k| k == key) {
                self.order.remove(position);
            }
        }
    }
}

pub struct CachedStorageManager {
    inner: Arc<dyn StorageManager>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CachedStorageManager {
    pub fn new(inner: Arc<dyn StorageManager>, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: Vec::new(),
                roots: HashMap::new(),
            }),
        }
    }
}

impl StorageManager for CachedStorageManager {
    fn get_root(&self, index_id: IndexId, slot_size: usize) -> Result<Option<NodeData>> {
        if let Some(root) = self.state.lock().roots.get(&index_id) {
            return Ok(Some(root.clone()));
        }
        self.inner.get_root(index_id, slot_size)
    }

    fn read_node(
        &self,
        index_id: IndexId,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<NodeData> {
        let key = (index_id, pointer);
        {
            let mut state = self.state.lock();
            if let Some(node) = state.entries.get(&key) {
                let node = node.clone();
                state.touch(&key);
                return Ok(node);
            }
        }
        let node = self.inner.read_node(index_id, pointer, slot_size)?;
        self.state
            .lock()
            .insert(self.capacity, key, node.clone());
        Ok(node)
    }

    fn write_new_node(&self, index_id: IndexId, bytes: &[u8], is_root: bool) -> Result<NodeData> {
        let node = self.inner.write_new_node(index_id, bytes, is_root)?;
        let mut state = self.state.lock();
        state.insert(self.capacity, (index_id, node.pointer), node.clone());
        if is_root {
            state.roots.insert(index_id, node.clone());
        }
        Ok(node)
    }

    fn update_node(
        &self,
        index_id: IndexId,
        bytes: &[u8],
        pointer: Pointer,
        is_root: bool,
    ) -> Result<()> {
        self.inner.update_node(index_id, bytes, pointer, is_root)?;
        let node = NodeData {
            pointer,
            bytes: bytes.to_vec(),
        };
        let mut state = self.state.lock();
        state.insert(self.capacity, (index_id, pointer), node.clone());
        if is_root {
            state.roots.insert(index_id, node);
        }
        Ok(())
    }

    fn remove_node(&self, index_id: IndexId, pointer: Pointer, slot_size: usize) -> Result<()> {
        self.inner.remove_node(index_id, pointer, slot_size)?;
        let mut state = self.state.lock();
        state.invalidate(&(index_id, pointer));
        if state.roots.get(&index_id).map(|node| node.pointer) == Some(pointer) {
            state.roots.remove(&index_id);
        }
        Ok(())
    }

    fn exists(&self, index_id: IndexId) -> bool {
        self.inner.exists(index_id)
    }

    fn purge_index(&self, index_id: IndexId) -> Result<()> {
        self.inner.purge_index(index_id)?;
        let mut state = self.state.lock();
        state.entries.retain(|(id, _), _| *id != index_id);
        state.order.retain(|(id, _)| *id != index_id);
        state.roots.remove(&index_id);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}
