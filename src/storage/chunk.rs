//! # Chunk Files
//!
//! A [`ChunkFile`] is one physical file of the index store: a flat sequence
//! of fixed-size node slots, grouped into growth blocks that indexes claim
//! as they expand. Access is memory-mapped and byte-granular; slot geometry
//! is the tree layer's business.
//!
//! ```text
//! ┌─────────────────── chunk file ───────────────────┐
//! │ index 7 region          │ index 9 region         │
//! │ [slot][slot][slot][...] │ [slot][slot][...]      │
//! └─────────────────────────┴────────────────────────┘
//!   region beginnings are tracked by the header manager;
//!   an all-zero first byte marks a free slot
//! ```
//!
//! ## Growth Model
//!
//! Chunk files start empty and grow in whole growth blocks. Growing flushes
//! the current map, extends the file, and remaps. A region can also be
//! opened in the middle of the file: [`ChunkFile::insert_zeros`] shifts the
//! tail right and zero-fills the gap, which is how a shared chunk makes room
//! for an index whose region is not the last one.
//!
//! ## Safety Model
//!
//! Same contract as the rest of the storage layer: reads borrow `&self`,
//! writes and remapping operations take `&mut self`, so the borrow checker
//! rules out slices outliving a remap with no runtime tracking.
//!
//! ## Durability
//!
//! Durability is best-effort and per-node: callers flush the written slot's
//! byte range after each node write. There is no journal; a crash between
//! two related slot writes is an accepted gap.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, eyre, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct ChunkFile {
    path: PathBuf,
    file: File,
    /// `None` while the file is empty; a zero-length file cannot be mapped.
    mmap: Option<MmapMut>,
    len: u64,
}

impl ChunkFile {
    /// Opens the chunk file at `path`, creating it empty when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open chunk file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat chunk file '{}'", path.display()))?
            .len();

        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files
            // can be modified externally. This is safe because:
            // 1. Chunk files are owned by this engine and shared only through
            //    the handle pool, which hands out one cell per path
            // 2. The mmap lifetime is tied to ChunkFile, preventing
            //    use-after-unmap
            // 3. All access goes through slice()/slice_mut() which
            //    bounds-check offset and length
            Some(unsafe {
                MmapMut::map_mut(&file)
                    .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
            })
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn mapped(&self) -> Result<&MmapMut> {
        self.mmap
            .as_ref()
            .ok_or_else(|| eyre!("chunk file '{}' is empty", self.path.display()))
    }

    fn mapped_mut(&mut self) -> Result<&mut MmapMut> {
        self.mmap
            .as_mut()
            .ok_or_else(|| eyre!("chunk file '{}' is empty", self.path.display()))
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        ensure!(
            offset + len as u64 <= self.len,
            "range {}..{} out of bounds in chunk file '{}' (len={})",
            offset,
            offset + len as u64,
            self.path.display(),
            self.len
        );
        Ok(())
    }

    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.check_range(offset, len)?;
        let start = offset as usize;
        Ok(&self.mapped()?[start..start + len])
    }

    pub fn slice_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        self.check_range(offset, len)?;
        let start = offset as usize;
        Ok(&mut self.mapped_mut()?[start..start + len])
    }

    pub fn write(&mut self, offset: u64, src: &[u8]) -> Result<()> {
        self.slice_mut(offset, src.len())?.copy_from_slice(src);
        Ok(())
    }

    pub fn zero_range(&mut self, offset: u64, len: usize) -> Result<()> {
        self.slice_mut(offset, len)?.fill(0);
        Ok(())
    }

    /// Extends the file by `additional` zero bytes at end-of-file and
    /// returns the former length, i.e. the offset where the new space
    /// begins.
    pub fn extend(&mut self, additional: u64) -> Result<u64> {
        let old_len = self.len;
        if additional == 0 {
            return Ok(old_len);
        }

        if let Some(mmap) = &self.mmap {
            mmap.flush()
                .wrap_err("failed to flush chunk before extension")?;
        }

        let new_len = old_len + additional;
        self.file
            .set_len(new_len)
            .wrap_err_with(|| format!("failed to extend chunk to {} bytes", new_len))?;

        // SAFETY: MmapMut::map_mut is unsafe because the old map becomes
        // invalid on remap. This is safe because:
        // 1. extend() takes &mut self, so no slices into the old map can
        //    exist (borrow checker)
        // 2. The old map was flushed above, so no written bytes are lost
        // 3. The file was extended before remapping, so the new map covers
        //    new_len bytes
        // 4. The old map is dropped when the new one is assigned
        self.mmap = Some(unsafe {
            MmapMut::map_mut(&self.file).wrap_err("failed to remap chunk after extension")?
        });
        self.len = new_len;

        Ok(old_len)
    }

    /// Inserts `len` zero bytes at `offset`, shifting everything from
    /// `offset` onward toward end-of-file. Used to open a region in the
    /// middle of a shared chunk.
    pub fn insert_zeros(&mut self, offset: u64, len: usize) -> Result<()> {
        ensure!(
            offset <= self.len,
            "insertion offset {} past end of chunk file '{}' (len={})",
            offset,
            self.path.display(),
            self.len
        );

        let old_len = self.len;
        self.extend(len as u64)?;

        let mmap = self.mapped_mut()?;
        let start = offset as usize;
        mmap.copy_within(start..old_len as usize, start + len);
        mmap[start..start + len].fill(0);
        Ok(())
    }

    /// Best-effort durability for one written range.
    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        self.check_range(offset, len)?;
        self.mapped()?
            .flush_range(offset as usize, len)
            .wrap_err_with(|| {
                format!(
                    "failed to flush range {}..{} of '{}'",
                    offset,
                    offset + len as u64,
                    self.path.display()
                )
            })
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()
                .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))?;
        }
        Ok(())
    }

    /// Hints the kernel that `offset..offset+len` is about to be read, e.g.
    /// ahead of a free-slot scan over a growth block. No-op out of bounds
    /// or off unix.
    pub fn advise_willneed(&self, offset: u64, len: usize) {
        let Some(mmap) = &self.mmap else { return };
        if offset >= self.len {
            return;
        }
        let len = len.min((self.len - offset) as usize);

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a read-ahead hint. This is
        // safe because:
        // 1. offset was bounds-checked above and len clamped to the mapped
        //    length, so the range lies inside the map
        // 2. The map stays valid for the duration of the call (&self borrow)
        unsafe {
            libc::madvise(
                mmap.as_ptr().add(offset as usize) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_empty_and_grows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunk.0.bin");

        let mut chunk = ChunkFile::open(&path).unwrap();
        assert!(chunk.is_empty());
        assert!(chunk.slice(0, 1).is_err());

        let at = chunk.extend(64).unwrap();
        assert_eq!(at, 0);
        assert_eq!(chunk.len(), 64);
        assert_eq!(chunk.slice(0, 64).unwrap(), &[0u8; 64][..]);
    }

    #[test]
    fn extend_returns_former_end() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        assert_eq!(chunk.extend(100).unwrap(), 0);
        assert_eq!(chunk.extend(50).unwrap(), 100);
        assert_eq!(chunk.len(), 150);
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunk.0.bin");

        {
            let mut chunk = ChunkFile::open(&path).unwrap();
            chunk.extend(32).unwrap();
            chunk.write(8, &[0xAB, 0xCD]).unwrap();
            chunk.sync().unwrap();
        }

        let chunk = ChunkFile::open(&path).unwrap();
        assert_eq!(chunk.len(), 32);
        assert_eq!(chunk.slice(8, 2).unwrap(), &[0xAB, 0xCD]);
    }

    #[test]
    fn extend_preserves_existing_data() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        chunk.extend(16).unwrap();
        chunk.write(0, &[1, 2, 3, 4]).unwrap();
        chunk.extend(1024).unwrap();

        assert_eq!(chunk.slice(0, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(chunk.slice(16, 8).unwrap(), &[0u8; 8][..]);
    }

    #[test]
    fn insert_zeros_shifts_tail() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        chunk.extend(8).unwrap();
        chunk.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        chunk.insert_zeros(4, 4).unwrap();

        assert_eq!(chunk.len(), 12);
        assert_eq!(
            chunk.slice(0, 12).unwrap(),
            &[1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8]
        );
    }

    #[test]
    fn insert_zeros_at_end_is_plain_growth() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        chunk.extend(4).unwrap();
        chunk.write(0, &[9, 9, 9, 9]).unwrap();
        chunk.insert_zeros(4, 4).unwrap();

        assert_eq!(chunk.slice(0, 8).unwrap(), &[9, 9, 9, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn zero_range_clears_slot() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        chunk.extend(16).unwrap();
        chunk.write(0, &[0xFF; 16]).unwrap();
        chunk.zero_range(4, 8).unwrap();

        let bytes = chunk.slice(0, 16).unwrap();
        assert_eq!(&bytes[0..4], &[0xFF; 4]);
        assert_eq!(&bytes[4..12], &[0u8; 8]);
        assert_eq!(&bytes[12..16], &[0xFF; 4]);
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        chunk.extend(16).unwrap();
        assert!(chunk.slice(8, 8).is_ok());
        assert!(chunk.slice(8, 9).is_err());
        assert!(chunk.write(16, &[1]).is_err());
        assert!(chunk.insert_zeros(17, 1).is_err());
    }

    #[test]
    fn flush_range_accepts_written_slot() {
        let dir = tempdir().unwrap();
        let mut chunk = ChunkFile::open(dir.path().join("c.bin")).unwrap();

        chunk.extend(64).unwrap();
        chunk.write(24, &[7; 8]).unwrap();
        chunk.flush_range(24, 8).unwrap();
        chunk.advise_willneed(0, 64);
    }
}
