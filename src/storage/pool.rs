//! # File Handle Pool
//!
//! Shares one [`ChunkFile`] cell per path across every index that touches
//! the file. The pool bounds how many files are concurrently open: an
//! acquisition past the bound first tries to evict an idle handle (least
//! recently used first), then waits for a seat up to the configured
//! timeout, and finally fails with an operational error. Usage counts keep
//! a file open while any guard references it; idle handles stay cached so
//! hot files keep their map.
//!
//! An unlimited pool is the same type with [`UNLIMITED_OPEN_FILES`]
//! capacity; it never evicts and never waits.
//!
//! [`UNLIMITED_OPEN_FILES`]: crate::config::UNLIMITED_OPEN_FILES

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{bail, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, RwLock};

use super::chunk::ChunkFile;

struct PoolEntry {
    file: Arc<RwLock<ChunkFile>>,
    usage: usize,
}

struct PoolState {
    entries: HashMap<PathBuf, PoolEntry>,
    /// LRU order; front is the least recently acquired path.
    order: Vec<PathBuf>,
}

impl PoolState {
    fn touch(&mut self, path: &Path) {
        if let Some(position) = self.order.iter().position(|p| p == path) {
            let path = self.order.remove(position);
            self.order.push(path);
        }
    }

    /// Closes the least recently used idle handle. Returns whether a seat
    /// was freed.
    fn evict_idle(&mut self) -> Result<bool> {
        let Some(position) = self
            .order
            .iter()
            .position(|p| self.entries[p].usage == 0)
        else {
            return Ok(false);
        };

        let path = self.order.remove(position);
        if let Some(entry) = self.entries.remove(&path) {
            entry
                .file
                .read()
                .sync()
                .wrap_err_with(|| format!("failed to sync '{}' on eviction", path.display()))?;
        }
        Ok(true)
    }
}

pub struct FileHandlerPool {
    max_open: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState>,
    seat_freed: Condvar,
}

impl FileHandlerPool {
    pub fn new(max_open: usize, acquire_timeout: Duration) -> Self {
        Self {
            max_open: max_open.max(1),
            acquire_timeout,
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
            seat_freed: Condvar::new(),
        }
    }

    /// Acquires the shared handle for `path`, opening the file when it has
    /// no handle yet. Fails when the pool stays full of busy handles for
    /// longer than the acquire timeout.
    pub fn acquire(&self, path: &Path) -> Result<FileGuard<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(entry) = state.entries.get_mut(path) {
                entry.usage += 1;
                let file = Arc::clone(&entry.file);
                state.touch(path);
                return Ok(FileGuard {
                    pool: self,
                    path: path.to_path_buf(),
                    file,
                });
            }

            if state.entries.len() < self.max_open {
                break;
            }
            if state.evict_idle()? {
                continue;
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                bail!(
                    "timed out acquiring a file handle for '{}' ({} handles open, all busy)",
                    path.display(),
                    state.entries.len()
                );
            };
            if self.seat_freed.wait_for(&mut state, remaining).timed_out() {
                bail!(
                    "timed out acquiring a file handle for '{}' ({} handles open, all busy)",
                    path.display(),
                    state.entries.len()
                );
            }
        }

        let file = Arc::new(RwLock::new(ChunkFile::open(path)?));
        state.entries.insert(
            path.to_path_buf(),
            PoolEntry {
                file: Arc::clone(&file),
                usage: 1,
            },
        );
        state.order.push(path.to_path_buf());

        Ok(FileGuard {
            pool: self,
            path: path.to_path_buf(),
            file,
        })
    }

    fn release(&self, path: &Path) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(path) {
            entry.usage = entry.usage.saturating_sub(1);
            if entry.usage == 0 {
                self.seat_freed.notify_one();
            }
        }
    }

    /// Syncs every open handle without closing anything.
    pub fn sync_all(&self) -> Result<()> {
        let state = self.state.lock();
        for (path, entry) in state.entries.iter() {
            entry
                .file
                .read()
                .sync()
                .wrap_err_with(|| format!("failed to sync '{}'", path.display()))?;
        }
        Ok(())
    }

    /// Syncs and drops every handle. Outstanding guards stay valid; their
    /// release becomes a no-op.
    pub fn close_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        for (path, entry) in state.entries.drain() {
            entry
                .file
                .read()
                .sync()
                .wrap_err_with(|| format!("failed to sync '{}' on close", path.display()))?;
        }
        state.order.clear();
        self.seat_freed.notify_all();
        Ok(())
    }
}

/// A usage-counted lease on a pooled chunk file. Dropping the guard
/// releases the seat.
pub struct FileGuard<'a> {
    pool: &'a FileHandlerPool,
    path: PathBuf,
    file: Arc<RwLock<ChunkFile>>,
}

impl FileGuard<'_> {
    pub fn file(&self) -> &RwLock<ChunkFile> {
        &self.file
    }
}

// Manual impl: the pool and chunk file behind the guard have no `Debug`.
impl std::fmt::Debug for FileGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGuard")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        self.pool.release(&self.path);
    }
}
