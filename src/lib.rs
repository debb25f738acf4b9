//! # blockvfs - A Virtual Filesystem in a Single Host File
//!
//! `blockvfs` keeps a flat namespace of files inside one ordinary host file,
//! carved into fixed-size, checksummed blocks:
//!
//! - **Block codec**: header, file-index and data blocks, each framed by a
//!   signature and a CRC32 of its body
//! - **Block storage**: random access to blocks by reference over any
//!   seekable byte store
//! - **Backend**: a free-list allocator, the file index and per-file data
//!   chains
//! - **Frontend**: name-based file operations and byte channels, with one
//!   shared in-memory buffer per open file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockvfs::{Result, VirtualFileSystem};
//!
//! # fn main() -> Result<()> {
//! // Created with 512-byte blocks if the file does not exist yet
//! let vfs = VirtualFileSystem::open("volume.vfs")?;
//!
//! let mut channel = vfs.open_for_writing("notes.txt")?;
//! channel.write(b"Hello, World!")?;
//! channel.close()?;
//!
//! let mut channel = vfs.open_for_reading("notes.txt")?;
//! let mut buf = [0u8; 64];
//! let read = channel.read(&mut buf)?;
//! assert_eq!(read, Some(13));
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom block size
//!
//! ```rust,no_run
//! use blockvfs::{Result, VirtualFileSystem};
//!
//! # fn main() -> Result<()> {
//! let vfs = VirtualFileSystem::builder()
//!     .block_size(4096)
//!     .open("big-blocks.vfs")?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod core;
pub mod error;

pub use crate::channel::VirtualFileChannel;
pub use crate::config::{VfsConfig, VirtualFileSystemBuilder, DEFAULT_BLOCK_SIZE};
pub use crate::core::{
    backend::{Backend, FileHandle, FileInfo},
    memory::MemoryBlockStorage,
    storage::{BlockStorage, FileBlockStorage, MIN_BLOCK_SIZE},
};
pub use crate::error::{Result, VfsError};

use crate::core::entity::{ContentStore, FileEntity};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) type SharedEntity<S> = Arc<FileEntity<VolumeContent<S>>>;

/// Everything guarded by the filesystem-wide lock
struct Volume<S> {
    backend: Backend<S>,
    files: HashMap<String, SharedEntity<S>>,
}

/// Loads and stores one file's content through the owning volume
pub(crate) struct VolumeContent<S> {
    volume: Weak<Mutex<Volume<S>>>,
    handle: FileHandle,
}

impl<S: BlockStorage> VolumeContent<S> {
    fn volume(&self) -> Result<Arc<Mutex<Volume<S>>>> {
        self.volume.upgrade().ok_or(VfsError::Detached)
    }
}

impl<S: BlockStorage> ContentStore for VolumeContent<S> {
    fn load(&self) -> Result<Vec<u8>> {
        let volume = self.volume()?;
        let mut volume = volume.lock();
        volume.backend.load_file(self.handle)
    }

    fn store(&self, content: &[u8]) -> Result<()> {
        let volume = self.volume()?;
        let mut volume = volume.lock();
        volume.backend.store_file(self.handle, content)
    }
}

/// A flat namespace of files stored in one block storage
///
/// Structural operations (create, delete, open, list) are serialized by a
/// filesystem-wide lock. Reads and writes through an open channel only take
/// the lock of that file's buffer; its content reaches the storage when the
/// last channel on the file is closed.
///
/// Locks are always taken buffer first, filesystem second.
///
/// # Examples
///
/// ```rust
/// use blockvfs::{MemoryBlockStorage, VirtualFileSystem};
///
/// # fn main() -> blockvfs::Result<()> {
/// let vfs = VirtualFileSystem::with_storage(MemoryBlockStorage::formatted())?;
/// vfs.create_file("a.txt")?;
/// assert!(vfs.exists("a.txt"));
/// assert_eq!(vfs.list()?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct VirtualFileSystem<S: BlockStorage> {
    volume: Arc<Mutex<Volume<S>>>,
}

impl VirtualFileSystem<FileBlockStorage<File>> {
    /// Open a storage file, initializing it with default settings if it is
    /// missing or empty
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        VirtualFileSystemBuilder::new().open(path)
    }

    pub fn builder() -> VirtualFileSystemBuilder {
        VirtualFileSystemBuilder::new()
    }
}

impl<S: BlockStorage> VirtualFileSystem<S> {
    /// Wrap an already initialized block storage
    pub fn with_storage(storage: S) -> Result<Self> {
        Self::from_backend(Backend::new(storage))
    }

    pub(crate) fn from_backend(mut backend: Backend<S>) -> Result<Self> {
        let index = backend.build_index()?;
        let volume = Arc::new(Mutex::new(Volume {
            backend,
            files: HashMap::with_capacity(index.len()),
        }));

        {
            let weak = Arc::downgrade(&volume);
            let mut guard = volume.lock();
            for info in index {
                let entity = new_entity(&weak, &info.name, info.handle);
                guard.files.insert(info.name, entity);
            }
            debug!("Built file table with {} entries", guard.files.len());
        }

        Ok(VirtualFileSystem { volume })
    }

    /// Create a new empty file
    pub fn create_file(&self, name: &str) -> Result<()> {
        let mut volume = self.volume.lock();
        self.create_locked(&mut volume, name)?;
        Ok(())
    }

    /// Delete a file together with its content.
    ///
    /// Fails with [`VfsError::InUse`] while any channel on the file is open.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let mut volume = self.volume.lock();
        let entity = volume
            .files
            .get(name)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        if entity.is_pinned() {
            return Err(VfsError::InUse(name.to_string()));
        }

        let handle = entity.content_store().handle;
        volume.backend.delete_file(handle)?;
        volume.files.remove(name);

        debug!("Deleted '{}'", name);
        Ok(())
    }

    pub fn open_for_reading(&self, name: &str) -> Result<VirtualFileChannel<S>> {
        self.open_channel(name, false)
    }

    /// Open a file for reading and writing, creating it if it does not exist
    pub fn open_for_writing(&self, name: &str) -> Result<VirtualFileChannel<S>> {
        self.open_channel(name, true)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.volume.lock().files.contains_key(name)
    }

    /// All files in creation order.
    ///
    /// Sizes are those last written back to the storage, so changes still
    /// held by open channels are not reflected.
    pub fn list(&self) -> Result<Vec<FileInfo>> {
        self.volume.lock().backend.build_index()
    }

    /// Number of blocks in the underlying storage, free ones included
    pub fn block_count(&self) -> u32 {
        self.volume.lock().backend.storage().block_count()
    }

    /// Push buffered storage writes down to the host store
    pub fn flush(&self) -> Result<()> {
        self.volume.lock().backend.flush()
    }

    /// Flush and release the filesystem.
    ///
    /// Channels still open afterwards can no longer write their content back.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    fn create_locked(&self, volume: &mut Volume<S>, name: &str) -> Result<SharedEntity<S>> {
        if volume.files.contains_key(name) {
            return Err(VfsError::AlreadyExists(name.to_string()));
        }

        let handle = volume.backend.create_file(name)?;
        let entity = new_entity(&Arc::downgrade(&self.volume), name, handle);
        volume.files.insert(name.to_string(), entity.clone());
        Ok(entity)
    }

    fn open_channel(&self, name: &str, writable: bool) -> Result<VirtualFileChannel<S>> {
        let entity = {
            let mut volume = self.volume.lock();
            let existing = volume.files.get(name).cloned();
            let entity = match existing {
                Some(entity) => entity,
                None if writable => self.create_locked(&mut volume, name)?,
                None => return Err(VfsError::NotFound(name.to_string())),
            };
            // Pinned before the lock is released so a concurrent delete sees it
            entity.pin();
            entity
        };

        if let Err(e) = entity.open() {
            entity.unpin();
            return Err(e);
        }

        debug!(
            "Opened '{}' for {}",
            name,
            if writable { "writing" } else { "reading" }
        );
        Ok(VirtualFileChannel::new(entity, writable))
    }
}

fn new_entity<S: BlockStorage>(
    volume: &Weak<Mutex<Volume<S>>>,
    name: &str,
    handle: FileHandle,
) -> SharedEntity<S> {
    Arc::new(FileEntity::new(
        name,
        VolumeContent {
            volume: volume.clone(),
            handle,
        },
    ))
}
