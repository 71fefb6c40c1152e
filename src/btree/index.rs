//! # Unique Tree Index
//!
//! [`UniqueTreeIndex`] is the public face of one B+Tree: a unique mapping
//! from codec-typed keys to data [`Pointer`]s, persisted through whatever
//! [`StorageManager`] and [`SessionStrategy`] it was built over.
//!
//! ## Concurrency
//!
//! Every index id has one `RwLock` in the [`LockRegistry`] the index was
//! opened with.
//! Mutations (`add_index`, `update_index`, `remove_index`, `purge`) take
//! the write half; lookups, size and iteration take the read half, so
//! readers never observe a tree mid-rebalance. [`sorted_iter`] keeps the
//! read guard alive inside the returned iterator for as long as the caller
//! walks it.
//!
//! [`sorted_iter`]: UniqueTreeIndex::sorted_iter

use std::marker::PhantomData;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::config::PURGE_BATCH_MULTIPLIER;
use crate::storage::{IndexId, IoSession, Pointer, SessionStrategy, StorageManager};

use super::delete::remove;
use super::insert::insert;
use super::key::KeyCodec;
use super::navigation::{path_to_leaf, persist, read_root, Direction, LeafCursor};
use super::node::TreeLayout;

/// Hands out the per-index lock shared by every [`UniqueTreeIndex`] handle
/// opened on the same id.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<IndexId, Arc<RwLock<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, index_id: IndexId) -> Arc<RwLock<()>> {
        self.locks.lock().entry(index_id).or_default().clone()
    }
}

/// One unique B+Tree index over a storage manager.
pub struct UniqueTreeIndex<C: KeyCodec> {
    layout: TreeLayout,
    manager: Arc<dyn StorageManager>,
    strategy: SessionStrategy,
    index_id: IndexId,
    lock: Arc<RwLock<()>>,
    _codec: PhantomData<C>,
}

impl<C: KeyCodec> UniqueTreeIndex<C> {
    /// Opens a handle on `index_id`. The tree itself is materialized lazily
    /// by the first `add_index`; opening an id with no stored nodes is
    /// free. `value_size` below a pointer's width pads up to one, since
    /// leaf values embed the data pointer.
    pub fn new(
        index_id: IndexId,
        degree: usize,
        value_size: usize,
        manager: Arc<dyn StorageManager>,
        strategy: SessionStrategy,
        locks: &LockRegistry,
    ) -> Self {
        Self {
            layout: TreeLayout::for_codec::<C>(degree, value_size),
            manager,
            strategy,
            index_id,
            lock: locks.lock_for(index_id),
            _codec: PhantomData,
        }
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn layout(&self) -> TreeLayout {
        self.layout
    }

    fn session(&self) -> Box<dyn IoSession> {
        self.strategy
            .create(self.manager.clone(), self.index_id, self.layout.slot_size())
    }

    fn check_key(key: &C::Key) -> Result<()> {
        ensure!(
            C::is_valid(key),
            "key {:?} cannot be indexed with this codec",
            key
        );
        Ok(())
    }

    /// Maps `key` to `value`. Fails on a duplicate key without touching the
    /// store.
    pub fn add_index(&self, key: C::Key, value: Pointer) -> Result<()> {
        Self::check_key(&key)?;
        let _write = self.lock.write();
        let mut session = self.session();
        insert::<C>(session.as_mut(), self.layout, key, value)?;
        session.commit()
    }

    pub fn get_index(&self, key: &C::Key) -> Result<Option<Pointer>> {
        Self::check_key(key)?;
        let _read = self.lock.read();
        let mut session = self.session();
        let Some(root) = read_root::<C>(session.as_mut(), self.layout)? else {
            return Ok(None);
        };
        let path = path_to_leaf(session.as_mut(), self.layout, root, key)?;
        Ok(path[0]
            .leaf_key_values()
            .into_iter()
            .find(|(present, _)| present == key)
            .map(|(_, value)| value))
    }

    /// Repoints an existing key at a new value. Fails if the key is not
    /// indexed.
    pub fn update_index(&self, key: &C::Key, value: Pointer) -> Result<()> {
        Self::check_key(key)?;
        let _write = self.lock.write();
        let mut session = self.session();
        let Some(root) = read_root::<C>(session.as_mut(), self.layout)? else {
            bail!("cannot update key {:?}: nothing is indexed under it", key);
        };
        let mut path = path_to_leaf(session.as_mut(), self.layout, root, key)?;
        let mut entries = path[0].leaf_key_values();
        let Some(entry) = entries.iter_mut().find(|(present, _)| present == key) else {
            bail!("cannot update key {:?}: nothing is indexed under it", key);
        };
        entry.1 = value;
        path[0].set_leaf_key_values(&entries);
        persist(session.as_mut(), &mut path[0])?;
        session.commit()
    }

    /// Removes `key`, reporting whether it was present.
    pub fn remove_index(&self, key: &C::Key) -> Result<bool> {
        Self::check_key(key)?;
        let _write = self.lock.write();
        let mut session = self.session();
        let removed = remove::<C>(session.as_mut(), self.layout, key)?;
        session.commit()?;
        Ok(removed)
    }

    /// Number of indexed keys, counted along the leaf chain.
    pub fn size(&self) -> Result<u64> {
        let _read = self.lock.read();
        let mut session = self.session();
        let mut cursor =
            LeafCursor::<C>::open(session.as_mut(), self.layout, Direction::Ascending)?;
        let mut count = 0u64;
        while cursor.next(session.as_mut())?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Iterates every `(key, value)` pair in key order. The iterator holds
    /// the index's read lock until dropped.
    pub fn sorted_iter(&self, direction: Direction) -> Result<SortedIter<'_, C>> {
        let guard = self.lock.read();
        let mut session = self.session();
        let cursor = LeafCursor::<C>::open(session.as_mut(), self.layout, direction)?;
        Ok(SortedIter {
            _guard: guard,
            session,
            cursor,
            failed: false,
        })
    }

    /// Drains every entry in batches, then releases the index's storage
    /// regions and header entries.
    pub fn purge(&self) -> Result<()> {
        let _write = self.lock.write();
        let batch_size = self.layout.degree() * PURGE_BATCH_MULTIPLIER;
        loop {
            let mut session = self.session();
            let mut cursor =
                LeafCursor::<C>::open(session.as_mut(), self.layout, Direction::Ascending)?;
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                match cursor.next(session.as_mut())? {
                    Some((key, _)) => batch.push(key),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            for key in &batch {
                remove::<C>(session.as_mut(), self.layout, key)?;
            }
            session.commit()?;
        }
        self.manager.purge_index(self.index_id)
    }
}

impl<C: KeyCodec> std::fmt::Debug for UniqueTreeIndex<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueTreeIndex")
            .field("index_id", &self.index_id)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Key-ordered traversal handle returned by
/// [`UniqueTreeIndex::sorted_iter`]. A storage failure mid-walk is yielded
/// once as `Err` and ends the iteration.
pub struct SortedIter<'a, C: KeyCodec> {
    _guard: RwLockReadGuard<'a, ()>,
    session: Box<dyn IoSession>,
    cursor: LeafCursor<C>,
    failed: bool,
}

impl<C: KeyCodec> Iterator for SortedIter<'_, C> {
    type Item = Result<(C::Key, Pointer)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.next(self.session.as_mut()) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}
