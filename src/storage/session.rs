//! # IO Sessions
//!
//! Tree operations never talk to the storage manager directly; they go
//! through an [`IoSession`], which scopes one insert or delete worth of
//! node traffic and decides when mutations reach the store.
//!
//! - [`ImmediateSession`] dispatches every call synchronously; `commit` is
//!   a no-op. This is the default strategy.
//! - [`SnapshotSession`] writes new nodes eagerly (allocation cannot be
//!   deferred) but buffers updates and removals in an overlay keyed by
//!   pointer, with the **last action per pointer winning**. `commit`
//!   flushes the overlay; a failed flush rolls the store back to the bytes
//!   each touched node had when the session first saw it and removes every
//!   node the session created.
//!
//! The overlay must let an update follow a removal of the same pointer:
//! delete rebalancing removes an emptied parent and can then refill the
//! same slot while unwinding, and the refill has to win.

use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use hashbrown::HashMap;

use super::manager::StorageManager;
use super::pointer::Pointer;
use super::{IndexId, NodeData};

/// Which session strategy an index runs its operations under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStrategy {
    Immediate,
    Snapshot,
}

impl SessionStrategy {
    pub fn create(
        &self,
        manager: Arc<dyn StorageManager>,
        index_id: IndexId,
        slot_size: usize,
    ) -> Box<dyn IoSession> {
        match self {
            SessionStrategy::Immediate => {
                Box::new(ImmediateSession::new(manager, index_id, slot_size))
            }
            SessionStrategy::Snapshot => {
                Box::new(SnapshotSession::new(manager, index_id, slot_size))
            }
        }
    }
}

/// One operation's window onto node storage. All methods deal in raw slot
/// bytes; decoding is the tree layer's business.
pub trait IoSession {
    fn get_root(&mut self) -> Result<Option<NodeData>>;
    fn read(&mut self, pointer: Pointer) -> Result<NodeData>;
    /// Persists a brand-new node and returns it with its assigned pointer.
    fn write(&mut self, bytes: &[u8], is_root: bool) -> Result<NodeData>;
    fn update(&mut self, pointer: Pointer, bytes: &[u8], is_root: bool) -> Result<()>;
    fn remove(&mut self, pointer: Pointer) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
}

pub struct ImmediateSession {
    manager: Arc<dyn StorageManager>,
    index_id: IndexId,
    slot_size: usize,
}

impl ImmediateSession {
    pub fn new(manager: Arc<dyn StorageManager>, index_id: IndexId, slot_size: usize) -> Self {
        Self {
            manager,
            index_id,
            slot_size,
        }
    }
}

impl IoSession for ImmediateSession {
    fn get_root(&mut self) -> Result<Option<NodeData>> {
        self.manager.get_root(self.index_id, self.slot_size)
    }

    fn read(&mut self, pointer: Pointer) -> Result<NodeData> {
        self.manager.read_node(self.index_id, pointer, self.slot_size)
    }

    fn write(&mut self, bytes: &[u8], is_root: bool) -> Result<NodeData> {
        self.manager.write_new_node(self.index_id, bytes, is_root)
    }

    fn update(&mut self, pointer: Pointer, bytes: &[u8], is_root: bool) -> Result<()> {
        self.manager
            .update_node(self.index_id, bytes, pointer, is_root)
    }

    fn remove(&mut self, pointer: Pointer) -> Result<()> {
        self.manager
            .remove_node(self.index_id, pointer, self.slot_size)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

enum Pending {
    Update { bytes: Vec<u8>, is_root: bool },
    Remove,
}

pub struct SnapshotSession {
    manager: Arc<dyn StorageManager>,
    index_id: IndexId,
    slot_size: usize,
    /// Last action per pointer; later calls overwrite earlier ones.
    overlay: HashMap<Pointer, Pending>,
    /// First-seen on-disk bytes of every pre-existing node the session
    /// touched, for rollback.
    originals: HashMap<Pointer, Vec<u8>>,
    /// Nodes this session allocated, in creation order.
    created: Vec<Pointer>,
    /// Bytes the created nodes were written with, for overlay-free reads.
    created_bytes: HashMap<Pointer, Vec<u8>>,
}

impl SnapshotSession {
    pub fn new(manager: Arc<dyn StorageManager>, index_id: IndexId, slot_size: usize) -> Self {
        Self {
            manager,
            index_id,
            slot_size,
            overlay: HashMap::new(),
            originals: HashMap::new(),
            created: Vec::new(),
            created_bytes: HashMap::new(),
        }
    }

    /// Snapshots the current on-disk bytes of `pointer` unless the node was
    /// created by this session or snapshotted already.
    fn snapshot_original(&mut self, pointer: Pointer) -> Result<()> {
        if self.created_bytes.contains_key(&pointer) || self.originals.contains_key(&pointer) {
            return Ok(());
        }
        let current = self
            .manager
            .read_node(self.index_id, pointer, self.slot_size)?;
        self.originals.insert(pointer, current.bytes);
        Ok(())
    }

    /// Restores every touched node to its pre-session bytes and removes
    /// every node the session created.
    pub fn rollback(&mut self) -> Result<()> {
        for (pointer, bytes) in self.originals.drain() {
            self.manager
                .update_node(self.index_id, &bytes, pointer, false)
                .wrap_err_with(|| format!("rollback failed restoring node {}", pointer))?;
        }
        for pointer in self.created.drain(..) {
            self.manager
                .remove_node(self.index_id, pointer, self.slot_size)
                .wrap_err_with(|| format!("rollback failed removing created node {}", pointer))?;
        }
        self.overlay.clear();
        self.created_bytes.clear();
        Ok(())
    }
}

impl IoSession for SnapshotSession {
    fn get_root(&mut self) -> Result<Option<NodeData>> {
        let Some(root) = self.manager.get_root(self.index_id, self.slot_size)? else {
            return Ok(None);
        };
        match self.overlay.get(&root.pointer) {
            Some(Pending::Update { bytes, .. }) => Ok(Some(NodeData {
                pointer: root.pointer,
                bytes: bytes.clone(),
            })),
            Some(Pending::Remove) => Ok(None),
            None => Ok(Some(root)),
        }
    }

    fn read(&mut self, pointer: Pointer) -> Result<NodeData> {
        match self.overlay.get(&pointer) {
            Some(Pending::Update { bytes, .. }) => {
                return Ok(NodeData {
                    pointer,
                    bytes: bytes.clone(),
                })
            }
            Some(Pending::Remove) => {
                bail!(
                    "read of node {} which this session already removed (index {})",
                    pointer,
                    self.index_id
                );
            }
            None => {}
        }
        if let Some(bytes) = self.created_bytes.get(&pointer) {
            return Ok(NodeData {
                pointer,
                bytes: bytes.clone(),
            });
        }
        let node = self
            .manager
            .read_node(self.index_id, pointer, self.slot_size)?;
        self.originals
            .entry(pointer)
            .or_insert_with(|| node.bytes.clone());
        Ok(node)
    }

    fn write(&mut self, bytes: &[u8], is_root: bool) -> Result<NodeData> {
        // Allocation cannot be buffered; the slot and its pointer must
        // exist before siblings and parents can reference it.
        let node = self.manager.write_new_node(self.index_id, bytes, is_root)?;
        self.created.push(node.pointer);
        self.created_bytes.insert(node.pointer, bytes.to_vec());
        Ok(node)
    }

    fn update(&mut self, pointer: Pointer, bytes: &[u8], is_root: bool) -> Result<()> {
        self.snapshot_original(pointer)?;
        self.overlay.insert(
            pointer,
            Pending::Update {
                bytes: bytes.to_vec(),
                is_root,
            },
        );
        Ok(())
    }

    fn remove(&mut self, pointer: Pointer) -> Result<()> {
        self.snapshot_original(pointer)?;
        self.overlay.insert(pointer, Pending::Remove);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let overlay: Vec<(Pointer, Pending)> = self.overlay.drain().collect();
        for (pointer, pending) in overlay {
            let flushed = match pending {
                Pending::Remove => self
                    .manager
                    .remove_node(self.index_id, pointer, self.slot_size),
                Pending::Update { bytes, is_root } => self
                    .manager
                    .update_node(self.index_id, &bytes, pointer, is_root),
            };
            if let Err(error) = flushed {
                self.rollback()
                    .wrap_err("rollback after failed commit also failed")?;
                return Err(error.wrap_err("session commit failed; store rolled back"));
            }
        }
        self.originals.clear();
        self.created.clear();
        self.created_bytes.clear();
        Ok(())
    }
}
