//! # Index Header Bookkeeping
//!
//! The storage manager does not own index metadata; it consumes it through
//! the [`HeaderManager`] trait: where each index's region begins inside each
//! chunk, and where each index's current root lives. Offsets recorded for
//! roots are relative to the index's region beginning, so region shifts do
//! not touch root entries.
//!
//! [`InMemoryHeaderManager`] is the bundled implementation, a mutex-guarded
//! table. Durable header persistence belongs to the embedding system.

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::IndexId;

/// A position inside the chunked store: which chunk, and a byte offset
/// whose base depends on context (chunk start for region beginnings, region
/// start for roots).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub chunk: u32,
    pub offset: u64,
}

impl Location {
    pub fn new(chunk: u32, offset: u64) -> Self {
        Self { chunk, offset }
    }
}

pub trait HeaderManager: Send + Sync {
    fn root_of_index(&self, index_id: IndexId) -> Option<Location>;
    fn set_root_of_index(&self, index_id: IndexId, location: Location) -> Result<()>;

    /// Where `index_id`'s region begins inside `chunk`, relative to the
    /// chunk start.
    fn index_beginning_in_chunk(&self, index_id: IndexId, chunk: u32) -> Option<Location>;
    fn set_index_beginning_in_chunk(
        &self,
        index_id: IndexId,
        chunk: u32,
        location: Location,
    ) -> Result<()>;

    /// The beginning of the region that follows `index_id`'s region in
    /// `chunk`, if any region does.
    fn next_index_beginning_in_chunk(&self, index_id: IndexId, chunk: u32) -> Option<Location>;

    /// Indexes owning a region in `chunk`, ordered by region offset.
    fn indexes_in_chunk(&self, chunk: u32) -> Vec<IndexId>;

    /// Chunks `index_id` owns a region in, ascending.
    fn chunks_of_index(&self, index_id: IndexId) -> Vec<u32>;

    /// Drops every trace of `index_id` (root and region entries).
    fn remove_index(&self, index_id: IndexId) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct RegionEntry {
    index_id: IndexId,
    offset: u64,
}

#[derive(Default)]
struct HeaderState {
    roots: HashMap<IndexId, Location>,
    /// Per chunk, region entries sorted by offset.
    regions: HashMap<u32, Vec<RegionEntry>>,
}

#[derive(Default)]
pub struct InMemoryHeaderManager {
    state: Mutex<HeaderState>,
}

impl InMemoryHeaderManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HeaderManager for InMemoryHeaderManager {
    fn root_of_index(&self, index_id: IndexId) -> Option<Location> {
        self.state.lock().roots.get(&index_id).copied()
    }

    fn set_root_of_index(&self, index_id: IndexId, location: Location) -> Result<()> {
        self.state.lock().roots.insert(index_id, location);
        Ok(())
    }

    fn index_beginning_in_chunk(&self, index_id: IndexId, chunk: u32) -> Option<Location> {
        let state = self.state.lock();
        let entries = state.regions.get(&chunk)?;
        entries
            .iter()
            .find(|entry| entry.index_id == index_id)
            .map(|entry| Location::new(chunk, entry.offset))
    }

    fn set_index_beginning_in_chunk(
        &self,
        index_id: IndexId,
        chunk: u32,
        location: Location,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let entries = state.regions.entry(chunk).or_default();
        match entries.iter_mut().find(|entry| entry.index_id == index_id) {
            Some(entry) => entry.offset = location.offset,
            None => entries.push(RegionEntry {
                index_id,
                offset: location.offset,
            }),
        }
        entries.sort_by_key(|entry| entry.offset);
        Ok(())
    }

    fn next_index_beginning_in_chunk(&self, index_id: IndexId, chunk: u32) -> Option<Location> {
        let state = self.state.lock();
        let entries = state.regions.get(&chunk)?;
        let position = entries
            .iter()
            .position(|entry| entry.index_id == index_id)?;
        entries
            .get(position + 1)
            .map(|entry| Location::new(chunk, entry.offset))
    }

    fn indexes_in_chunk(&self, chunk: u32) -> Vec<IndexId> {
        self.state
            .lock()
            .regions
            .get(&chunk)
            .map(|entries| entries.iter().map(|entry| entry.index_id).collect())
            .unwrap_or_default()
    }

    fn chunks_of_index(&self, index_id: IndexId) -> Vec<u32> {
        let state = self.state.lock();
        let mut chunks: Vec<u32> = state
            .regions
            .iter()
            .filter(|(_, entries)| entries.iter().any(|entry| entry.index_id == index_id))
            .map(|(chunk, _)| *chunk)
            .collect();
        chunks.sort_unstable();
        chunks
    }

    fn remove_index(&self, index_id: IndexId) -> Result<()> {
        let mut state = self.state.lock();
        state.roots.remove(&index_id);
        for entries in state.regions.values_mut() {
            entries.retain(|entry| entry.index_id != index_id);
        }
        state.regions.retain(|_, entries| !entries.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_round_trip() {
        let headers = InMemoryHeaderManager::new();
        assert_eq!(headers.root_of_index(1), None);

        headers.set_root_of_index(1, Location::new(0, 88)).unwrap();
        assert_eq!(headers.root_of_index(1), Some(Location::new(0, 88)));

        headers.set_root_of_index(1, Location::new(0, 176)).unwrap();
        assert_eq!(headers.root_of_index(1), Some(Location::new(0, 176)));
    }

    #[test]
    fn regions_sort_by_offset_within_chunk() {
        let headers = InMemoryHeaderManager::new();
        headers
            .set_index_beginning_in_chunk(2, 0, Location::new(0, 880))
            .unwrap();
        headers
            .set_index_beginning_in_chunk(1, 0, Location::new(0, 0))
            .unwrap();

        assert_eq!(headers.indexes_in_chunk(0), vec![1, 2]);
        assert_eq!(
            headers.next_index_beginning_in_chunk(1, 0),
            Some(Location::new(0, 880))
        );
        assert_eq!(headers.next_index_beginning_in_chunk(2, 0), None);
    }

    #[test]
    fn chunks_of_index_collects_every_chunk() {
        let headers = InMemoryHeaderManager::new();
        headers
            .set_index_beginning_in_chunk(1, 2, Location::new(2, 0))
            .unwrap();
        headers
            .set_index_beginning_in_chunk(1, 0, Location::new(0, 0))
            .unwrap();
        headers
            .set_index_beginning_in_chunk(3, 1, Location::new(1, 0))
            .unwrap();

        assert_eq!(headers.chunks_of_index(1), vec![0, 2]);
        assert_eq!(headers.chunks_of_index(3), vec![1]);
    }

    #[test]
    fn remove_index_drops_all_entries() {
        let headers = InMemoryHeaderManager::new();
        headers.set_root_of_index(1, Location::new(0, 0)).unwrap();
        headers
            .set_index_beginning_in_chunk(1, 0, Location::new(0, 0))
            .unwrap();
        headers
            .set_index_beginning_in_chunk(2, 0, Location::new(0, 880))
            .unwrap();

        headers.remove_index(1).unwrap();
        assert_eq!(headers.root_of_index(1), None);
        assert_eq!(headers.indexes_in_chunk(0), vec![2]);
        assert_eq!(headers.chunks_of_index(1), Vec::<u32>::new());
    }

    #[test]
    fn updating_a_region_keeps_one_entry_per_index() {
        let headers = InMemoryHeaderManager::new();
        headers
            .set_index_beginning_in_chunk(1, 0, Location::new(0, 100))
            .unwrap();
        headers
            .set_index_beginning_in_chunk(1, 0, Location::new(0, 300))
            .unwrap();

        assert_eq!(headers.indexes_in_chunk(0), vec![1]);
        assert_eq!(
            headers.index_beginning_in_chunk(1, 0),
            Some(Location::new(0, 300))
        );
    }
}
