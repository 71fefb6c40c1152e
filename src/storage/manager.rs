//! # Node Storage Manager
//!
//! [`StorageManager`] is the contract between the tree layer and the disk:
//! read, write, update and remove fixed-size node slots by [`Pointer`], and
//! keep the root locator current. [`ChunkedStorageManager`] is the
//! disk-backed implementation over [`ChunkFile`]s, with region bookkeeping
//! delegated to a [`HeaderManager`] and file sharing to a
//! [`FileHandlerPool`].
//!
//! ## Regions and Growth Blocks
//!
//! Each index owns one contiguous region per chunk, tracked by the header
//! manager and extended a growth block (`growth_node_allocation_count`
//! slots) at a time:
//!
//! ```text
//! chunk 0: │ idx 1 region          │ idx 2 region  │
//!          │ [blk][blk][blk]       │ [blk]         │
//!                       ▲ tombstone scan covers the last block
//! ```
//!
//! Allocation order: reuse a tombstoned slot from the region's last growth
//! block; else claim a new block at end-of-file, or splice it in front of
//! the next region (shifting the tail and re-basing every region behind the
//! splice); a chunk at its byte cap rolls allocation into the next chunk
//! number.
//!
//! ## Pointer Bases
//!
//! Callers only ever see region-relative node pointers, so a region shift
//! invalidates nothing above this module. Translation to absolute file
//! offsets happens here, under the chunk file's lock, which also orders
//! reads against concurrent tail shifts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use parking_lot::Mutex;

use crate::config::EngineConfig;

use super::chunk::ChunkFile;
use super::header::{HeaderManager, Location};
use super::pool::FileHandlerPool;
use super::pointer::Pointer;
use super::{IndexId, NodeData};

pub trait StorageManager: Send + Sync {
    /// The current root slot, or `None` for an index with no nodes yet.
    fn get_root(&self, index_id: IndexId, slot_size: usize) -> Result<Option<NodeData>>;

    fn read_node(&self, index_id: IndexId, pointer: Pointer, slot_size: usize)
        -> Result<NodeData>;

    /// Allocates a slot, writes `bytes` into it, and returns the node with
    /// its region-relative pointer. `is_root` additionally records the new
    /// root location.
    fn write_new_node(&self, index_id: IndexId, bytes: &[u8], is_root: bool) -> Result<NodeData>;

    fn update_node(
        &self,
        index_id: IndexId,
        bytes: &[u8],
        pointer: Pointer,
        is_root: bool,
    ) -> Result<()>;

    /// Tombstones the slot (zero fill), making it eligible for reuse.
    fn remove_node(&self, index_id: IndexId, pointer: Pointer, slot_size: usize) -> Result<()>;

    fn exists(&self, index_id: IndexId) -> bool;

    /// Zero-fills every region of the index and drops its header entries.
    fn purge_index(&self, index_id: IndexId) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// How indexes map onto chunk files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileScope {
    /// All indexes interleave their regions in one chunk file sequence.
    Shared,
    /// Each index gets its own chunk file sequence.
    PerIndex,
}

pub struct ChunkedStorageManager {
    base_dir: PathBuf,
    config: EngineConfig,
    scope: FileScope,
    headers: Arc<dyn HeaderManager>,
    pool: Arc<FileHandlerPool>,
    /// Serializes slot claiming across every index sharing this manager.
    alloc_lock: Mutex<()>,
}

impl ChunkedStorageManager {
    pub fn new<P: AsRef<Path>>(
        base_dir: P,
        config: EngineConfig,
        scope: FileScope,
        headers: Arc<dyn HeaderManager>,
        pool: Arc<FileHandlerPool>,
    ) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)
            .wrap_err_with(|| format!("failed to create index dir '{}'", base_dir.display()))?;
        Ok(Self {
            base_dir,
            config,
            scope,
            headers,
            pool,
            alloc_lock: Mutex::new(()),
        })
    }

    fn chunk_path(&self, index_id: IndexId, chunk: u32) -> PathBuf {
        match self.scope {
            FileScope::Shared => self.base_dir.join(format!("index-{chunk}.bin")),
            FileScope::PerIndex => self.base_dir.join(format!("{index_id}.index-{chunk}.bin")),
        }
    }

    fn region_beginning(&self, index_id: IndexId, chunk: u32) -> Result<u64> {
        self.headers
            .index_beginning_in_chunk(index_id, chunk)
            .map(|location| location.offset)
            .ok_or_else(|| eyre!("index {} has no region in chunk {}", index_id, chunk))
    }

    /// Claims a slot for one new node and returns `(chunk, absolute file
    /// offset)`. Caller must hold the allocation lock.
    fn allocate_slot(&self, index_id: IndexId, slot_size: usize) -> Result<(u32, u64)> {
        let growth = self.config.growth_block_size(slot_size) as u64;
        let capacity = self.config.chunk_capacity(slot_size);

        let mut chunk = self
            .headers
            .chunks_of_index(index_id)
            .last()
            .copied()
            .unwrap_or(0);

        loop {
            let path = self.chunk_path(index_id, chunk);
            let guard = self.pool.acquire(&path)?;
            let mut file = guard.file().write();

            let beginning = self.headers.index_beginning_in_chunk(index_id, chunk);

            if let Some(beginning) = beginning {
                // Reuse a tombstoned slot from the last growth block.
                let region_end = self
                    .headers
                    .next_index_beginning_in_chunk(index_id, chunk)
                    .map(|location| location.offset)
                    .unwrap_or(file.len());
                let scan_start = region_end.saturating_sub(growth).max(beginning.offset);

                file.advise_willneed(scan_start, (region_end - scan_start) as usize);
                let mut position = scan_start;
                while position + slot_size as u64 <= region_end {
                    if Pointer::slot_is_empty(file.slice(position, slot_size)?) {
                        return Ok((chunk, position));
                    }
                    position += slot_size as u64;
                }
            }

            // No reusable slot; the chunk must grow. A chunk at its cap
            // pushes the allocation into the next chunk number.
            if file.len() >= capacity {
                drop(file);
                drop(guard);
                chunk += 1;
                continue;
            }

            if beginning.is_none() {
                // First use of this chunk by this index: claim a block at
                // end-of-file and record the region.
                let offset = file.extend(growth)?;
                self.headers.set_index_beginning_in_chunk(
                    index_id,
                    chunk,
                    Location::new(chunk, offset),
                )?;
                return Ok((chunk, offset));
            }

            match self.headers.next_index_beginning_in_chunk(index_id, chunk) {
                None => {
                    // Last region in the chunk grows in place.
                    let offset = file.extend(growth)?;
                    return Ok((chunk, offset));
                }
                Some(next) => {
                    // Splice a block in front of the next region and re-base
                    // every region at or behind the splice point.
                    file.insert_zeros(next.offset, growth as usize)?;
                    for other in self.headers.indexes_in_chunk(chunk) {
                        if other == index_id {
                            continue;
                        }
                        if let Some(location) =
                            self.headers.index_beginning_in_chunk(other, chunk)
                        {
                            if location.offset >= next.offset {
                                self.headers.set_index_beginning_in_chunk(
                                    other,
                                    chunk,
                                    Location::new(chunk, location.offset + growth),
                                )?;
                            }
                        }
                    }
                    return Ok((chunk, next.offset));
                }
            }
        }
    }
}

impl StorageManager for ChunkedStorageManager {
    fn get_root(&self, index_id: IndexId, slot_size: usize) -> Result<Option<NodeData>> {
        let Some(root) = self.headers.root_of_index(index_id) else {
            return Ok(None);
        };
        let pointer = Pointer::new_node(root.offset, root.chunk);
        let node = self
            .read_node(index_id, pointer, slot_size)
            .wrap_err_with(|| format!("failed to read root of index {}", index_id))?;
        Ok(Some(node))
    }

    fn read_node(
        &self,
        index_id: IndexId,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<NodeData> {
        ensure!(
            pointer.is_node(),
            "cannot read node slot through non-node pointer {}",
            pointer
        );
        let path = self.chunk_path(index_id, pointer.chunk);
        let guard = self.pool.acquire(&path)?;
        let file = guard.file().read();

        // Resolved under the file lock so a concurrent region shift cannot
        // slide the region after the base was read.
        let beginning = self.region_beginning(index_id, pointer.chunk)?;
        let bytes = file
            .slice(beginning + pointer.offset, slot_size)
            .wrap_err_with(|| format!("failed to read node {} of index {}", pointer, index_id))?
            .to_vec();
        Ok(NodeData { pointer, bytes })
    }

    fn write_new_node(&self, index_id: IndexId, bytes: &[u8], is_root: bool) -> Result<NodeData> {
        let _alloc = self.alloc_lock.lock();
        let (chunk, absolute) = self.allocate_slot(index_id, bytes.len())?;

        let path = self.chunk_path(index_id, chunk);
        let guard = self.pool.acquire(&path)?;
        {
            let mut file = guard.file().write();
            file.write(absolute, bytes)?;
            file.flush_range(absolute, bytes.len())?;
        }

        let beginning = self.region_beginning(index_id, chunk)?;
        let pointer = Pointer::new_node(absolute - beginning, chunk);
        if is_root {
            self.headers
                .set_root_of_index(index_id, Location::new(chunk, pointer.offset))?;
        }
        Ok(NodeData {
            pointer,
            bytes: bytes.to_vec(),
        })
    }

    fn update_node(
        &self,
        index_id: IndexId,
        bytes: &[u8],
        pointer: Pointer,
        is_root: bool,
    ) -> Result<()> {
        ensure!(
            pointer.is_node(),
            "cannot update node slot through non-node pointer {}",
            pointer
        );
        let path = self.chunk_path(index_id, pointer.chunk);
        let guard = self.pool.acquire(&path)?;
        {
            let mut file = guard.file().write();
            let beginning = self.region_beginning(index_id, pointer.chunk)?;
            file.write(beginning + pointer.offset, bytes)
                .wrap_err_with(|| {
                    format!("failed to update node {} of index {}", pointer, index_id)
                })?;
            file.flush_range(beginning + pointer.offset, bytes.len())?;
        }
        if is_root {
            self.headers
                .set_root_of_index(index_id, Location::new(pointer.chunk, pointer.offset))?;
        }
        Ok(())
    }

    fn remove_node(&self, index_id: IndexId, pointer: Pointer, slot_size: usize) -> Result<()> {
        let path = self.chunk_path(index_id, pointer.chunk);
        let guard = self.pool.acquire(&path)?;
        let mut file = guard.file().write();
        let beginning = self.region_beginning(index_id, pointer.chunk)?;
        file.zero_range(beginning + pointer.offset, slot_size)
            .wrap_err_with(|| format!("failed to remove node {} of index {}", pointer, index_id))?;
        file.flush_range(beginning + pointer.offset, slot_size)?;
        Ok(())
    }

    fn exists(&self, index_id: IndexId) -> bool {
        self.headers.root_of_index(index_id).is_some()
            || !self.headers.chunks_of_index(index_id).is_empty()
    }

    fn purge_index(&self, index_id: IndexId) -> Result<()> {
        let _alloc = self.alloc_lock.lock();
        for chunk in self.headers.chunks_of_index(index_id) {
            let path = self.chunk_path(index_id, chunk);
            let guard = self.pool.acquire(&path)?;
            let mut file = guard.file().write();

            let beginning = self.region_beginning(index_id, chunk)?;
            let end = self
                .headers
                .next_index_beginning_in_chunk(index_id, chunk)
                .map(|location| location.offset)
                .unwrap_or(file.len());
            if end > beginning {
                file.zero_range(beginning, (end - beginning) as usize)?;
                file.flush_range(beginning, (end - beginning) as usize)?;
            }
        }
        self.headers.remove_index(index_id)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.pool.sync_all()
    }
}

impl std::fmt::Debug for ChunkedStorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedStorageManager")
            .field("base_dir", &self.base_dir)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::header::InMemoryHeaderManager;
    use std::time::Duration;
    use tempfile::tempdir;

    const SLOT: usize = 64;

    fn manager(dir: &Path, scope: FileScope, config: EngineConfig) -> ChunkedStorageManager {
        let headers = Arc::new(InMemoryHeaderManager::new());
        let pool = Arc::new(FileHandlerPool::new(8, Duration::from_millis(200)));
        ChunkedStorageManager::new(dir, config, scope, headers, pool).unwrap()
    }

    fn slot_bytes(tag: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; SLOT];
        bytes[0] = 0x02;
        bytes[1] = tag;
        bytes
    }

    #[test]
    fn first_write_creates_region_and_relative_pointer() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(4);
        let manager = manager(dir.path(), FileScope::Shared, config);

        let node = manager.write_new_node(1, &slot_bytes(0xAA), true).unwrap();
        assert_eq!(node.pointer, Pointer::new_node(0, 0));

        let read = manager.read_node(1, node.pointer, SLOT).unwrap();
        assert_eq!(read.bytes[1], 0xAA);

        let root = manager.get_root(1, SLOT).unwrap().unwrap();
        assert_eq!(root.pointer, node.pointer);
    }

    #[test]
    fn slots_fill_a_growth_block_sequentially() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(4);
        let manager = manager(dir.path(), FileScope::Shared, config);

        let offsets: Vec<u64> = (0..4)
            .map(|i| {
                manager
                    .write_new_node(1, &slot_bytes(i), false)
                    .unwrap()
                    .pointer
                    .offset
            })
            .collect();
        assert_eq!(offsets, vec![0, 64, 128, 192]);
    }

    #[test]
    fn tombstoned_slot_is_reused_before_growth() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(4);
        let manager = manager(dir.path(), FileScope::Shared, config);

        let mut nodes = Vec::new();
        for i in 0..4 {
            nodes.push(manager.write_new_node(1, &slot_bytes(i), false).unwrap());
        }
        manager.remove_node(1, nodes[2].pointer, SLOT).unwrap();

        let replacement = manager.write_new_node(1, &slot_bytes(0xEE), false).unwrap();
        assert_eq!(replacement.pointer, nodes[2].pointer);
    }

    #[test]
    fn full_region_extends_at_end_of_file() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(2);
        let manager = manager(dir.path(), FileScope::Shared, config);

        for i in 0..3 {
            manager.write_new_node(1, &slot_bytes(i), false).unwrap();
        }
        // Third slot landed in a second growth block.
        let chunk = ChunkFile::open(dir.path().join("index-0.bin")).unwrap();
        assert_eq!(chunk.len(), 4 * SLOT as u64);
    }

    #[test]
    fn interleaved_indexes_shift_following_regions() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(2);
        let manager = manager(dir.path(), FileScope::Shared, config);

        // idx 1 claims [0, 128), idx 2 claims [128, 256).
        let first = manager.write_new_node(1, &slot_bytes(1), false).unwrap();
        let second = manager.write_new_node(2, &slot_bytes(2), false).unwrap();
        assert_eq!(second.pointer.offset, 0);

        // idx 1's region is full after one more write; the next one splices
        // a block before idx 2's region.
        manager.write_new_node(1, &slot_bytes(3), false).unwrap();
        let spliced = manager.write_new_node(1, &slot_bytes(4), false).unwrap();
        assert_eq!(spliced.pointer.offset, 2 * SLOT as u64);

        // idx 2 still reads its node through its relative pointer.
        let read = manager.read_node(2, second.pointer, SLOT).unwrap();
        assert_eq!(read.bytes[1], 2);
        let read = manager.read_node(1, first.pointer, SLOT).unwrap();
        assert_eq!(read.bytes[1], 1);
    }

    #[test]
    fn chunk_at_cap_rolls_into_next_chunk() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default()
            .with_growth_allocation(2)
            .with_max_chunk_size(2 * SLOT as u64);
        let manager = manager(dir.path(), FileScope::Shared, config);

        for i in 0..2 {
            let node = manager.write_new_node(1, &slot_bytes(i), false).unwrap();
            assert_eq!(node.pointer.chunk, 0);
        }
        let rolled = manager.write_new_node(1, &slot_bytes(9), false).unwrap();
        assert_eq!(rolled.pointer.chunk, 1);
        assert_eq!(rolled.pointer.offset, 0);
        assert!(dir.path().join("index-1.bin").exists());
    }

    #[test]
    fn per_index_scope_separates_files() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(2);
        let manager = manager(dir.path(), FileScope::PerIndex, config);

        manager.write_new_node(1, &slot_bytes(1), false).unwrap();
        manager.write_new_node(2, &slot_bytes(2), false).unwrap();

        assert!(dir.path().join("1.index-0.bin").exists());
        assert!(dir.path().join("2.index-0.bin").exists());
    }

    #[test]
    fn update_persists_and_tracks_root() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(4);
        let manager = manager(dir.path(), FileScope::Shared, config);

        let node = manager.write_new_node(1, &slot_bytes(1), true).unwrap();
        let mut changed = node.bytes.clone();
        changed[1] = 0x55;
        manager.update_node(1, &changed, node.pointer, true).unwrap();

        assert_eq!(manager.read_node(1, node.pointer, SLOT).unwrap().bytes[1], 0x55);
        assert_eq!(manager.get_root(1, SLOT).unwrap().unwrap().bytes[1], 0x55);
    }

    #[test]
    fn purge_zeroes_region_and_forgets_index() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::default().with_growth_allocation(2);
        let manager = manager(dir.path(), FileScope::Shared, config);

        manager.write_new_node(1, &slot_bytes(1), true).unwrap();
        manager.write_new_node(2, &slot_bytes(2), true).unwrap();
        assert!(manager.exists(1));

        manager.purge_index(1).unwrap();
        assert!(!manager.exists(1));
        assert!(manager.get_root(1, SLOT).unwrap().is_none());

        // idx 2 is untouched.
        let survivor = manager.get_root(2, SLOT).unwrap().unwrap();
        assert_eq!(survivor.bytes[1], 2);

        // The zeroed slots read back as free.
        let chunk = ChunkFile::open(dir.path().join("index-0.bin")).unwrap();
        assert!(Pointer::slot_is_empty(chunk.slice(0, SLOT).unwrap()));
    }
}
