//! Fixed-capacity append-only byte sink over a memory-mapped file
//!
//! Writes land in the shared mapping immediately, so bytes written before a
//! hard kill are visible to the next process through the page cache. No
//! fsync is performed per write; durability against power loss is out of
//! contract.

use blackbox_core::{Result, StoreError};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Append-only stream backed by a mapped file of fixed capacity.
///
/// The unused tail always holds the fill byte, so a reader can detect the
/// end of valid data without a length field.
pub struct MappedStream {
    map: MmapMut,
    pos: usize,
    fill: u8,
    path: PathBuf,
    used: Arc<AtomicUsize>,
}

impl MappedStream {
    /// Create (or reopen) the file at `capacity` bytes, fill it entirely
    /// with `fill`, and map it for writing.
    pub fn create(path: &Path, capacity: usize, fill: u8) -> Result<Self> {
        if capacity == 0 {
            return Err(StoreError::fatal("stream capacity must be non-zero"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(capacity as u64)?;

        // Safety: the mapping is private to this process for the lifetime
        // of the stream; the file length was just fixed above.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map.fill(fill);

        Ok(Self {
            map,
            pos: 0,
            fill,
            path: path.to_path_buf(),
            used: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Append `bytes`, all-or-nothing.
    ///
    /// On overflow, position and contents are unchanged and
    /// [`StoreError::BufferOverflow`] is returned.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(StoreError::BufferOverflow {
                requested: bytes.len(),
                remaining,
            });
        }
        self.map[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        self.used.store(self.pos, Ordering::Release);
        Ok(())
    }

    /// Rewind to the start and refill the whole buffer with the fill byte.
    pub fn clear(&mut self) {
        self.map.fill(self.fill);
        self.pos = 0;
        self.used.store(0, Ordering::Release);
    }

    /// Bytes written since creation or the last [`clear`](Self::clear).
    pub fn used(&self) -> usize {
        self.pos
    }

    /// Bytes still available before the capacity is reached.
    pub fn remaining(&self) -> usize {
        self.map.len() - self.pos
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Shared counter mirroring [`used`](Self::used); readable without any
    /// lock for the high-water probe.
    pub fn used_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.used)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush dirty pages to the backing file.
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    /// Flush and unmap.
    pub fn close(self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}
