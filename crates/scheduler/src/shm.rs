//! Named shared-memory buffers.
//!
//! A buffer is a file in the system shared-memory directory (`/dev/shm`
//! where available) mapped with `MAP_SHARED` semantics via `memmap2`. The
//! executor attaches the same name the pool created, so writes on one side
//! are visible to readers on the other without copying. "Unlink" removes
//! the backing file; live mappings stay valid until dropped.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

/// Errors creating or attaching shared buffers.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("failed to create shared buffer {name}: {source}")]
    Create { name: String, source: io::Error },
    #[error("failed to attach shared buffer {name}: {source}")]
    Attach { name: String, source: io::Error },
    #[error("shared buffer {name} is {actual} bytes, expected {expected}")]
    Size { name: String, expected: usize, actual: usize },
}

/// Directory where named buffers live.
pub fn shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// A named, memory-mapped shared buffer.
#[derive(Debug)]
pub struct SharedBuffer {
    name: String,
    path: PathBuf,
    map: MmapMut,
    len: usize,
}

impl SharedBuffer {
    /// Create (or re-create) a buffer of `len` bytes under `name` in the
    /// default shared-memory directory.
    pub fn create(name: &str, len: usize) -> Result<Self, BufferError> {
        Self::create_in(&shm_dir(), name, len)
    }

    /// Create a buffer under an explicit directory.
    pub fn create_in(dir: &Path, name: &str, len: usize) -> Result<Self, BufferError> {
        let path = dir.join(name);
        let map_err = |source| BufferError::Create { name: name.to_owned(), source };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(map_err)?;
        file.set_len(len as u64).map_err(map_err)?;

        // SAFETY: the mapping is backed by a file this process just sized;
        // the file is never truncated while the mapping is alive.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file).map_err(map_err)? };

        debug!(name, len, "created shared buffer");
        Ok(Self { name: name.to_owned(), path, map, len })
    }

    /// Attach to an existing buffer by name, verifying its size.
    pub fn attach(name: &str, len: usize) -> Result<Self, BufferError> {
        Self::attach_in(&shm_dir(), name, len)
    }

    /// Attach to an existing buffer under an explicit directory.
    pub fn attach_in(dir: &Path, name: &str, len: usize) -> Result<Self, BufferError> {
        let path = dir.join(name);
        let map_err = |source| BufferError::Attach { name: name.to_owned(), source };

        let file = OpenOptions::new().read(true).write(true).open(&path).map_err(map_err)?;
        let actual = file.metadata().map_err(map_err)?.len() as usize;
        if actual < len {
            return Err(BufferError::Size { name: name.to_owned(), expected: len, actual });
        }

        // SAFETY: size verified above; the creator keeps the file at least
        // this long for the buffer's lifetime.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file).map_err(map_err)? };

        debug!(name, len, "attached shared buffer");
        Ok(Self { name: name.to_owned(), path, map, len })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Remove the backing file. Live mappings (this one and any other
    /// attachment) remain readable until dropped.
    pub fn unlink(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(name = %self.name, "unlinked shared buffer"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(name = %self.name, %err, "shared buffer unlink failed"),
        }
    }

    /// Whether the backing file still exists (unlink makes this false).
    pub fn is_linked(&self) -> bool {
        self.path.exists()
    }
}
