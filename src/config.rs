//! Filesystem configuration and builder

use crate::core::backend::Backend;
use crate::core::storage::{validate_block_size, BlockStorage, FileBlockStorage};
use crate::error::{Result, VfsError};
use crate::VirtualFileSystem;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::info;

/// Block size of freshly initialized storage files
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Settings applied when a filesystem is opened
///
/// # Examples
///
/// ```rust
/// use blockvfs::VfsConfig;
///
/// # fn main() -> blockvfs::Result<()> {
/// let config = VfsConfig::from_toml_str("block_size = 1024")?;
/// assert_eq!(config.block_size, 1024);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Only used when the storage file is empty; an existing file keeps the
    /// block size recorded in its header
    pub block_size: u32,
}

impl Default for VfsConfig {
    fn default() -> Self {
        VfsConfig {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl VfsConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: VfsConfig =
            toml::from_str(source).map_err(|e| VfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| VfsError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;
        Ok(())
    }
}

/// Builder for opening a [`VirtualFileSystem`] with custom settings
///
/// # Examples
///
/// ```rust,no_run
/// use blockvfs::VirtualFileSystemBuilder;
///
/// # fn main() -> blockvfs::Result<()> {
/// let vfs = VirtualFileSystemBuilder::new()
///     .block_size(4096)
///     .open("volume.vfs")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct VirtualFileSystemBuilder {
    config: VfsConfig,
}

impl VirtualFileSystemBuilder {
    pub fn new() -> Self {
        VirtualFileSystemBuilder {
            config: VfsConfig::default(),
        }
    }

    /// Set the block size used if the storage file has to be initialized
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Replace all settings at once
    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    /// Open (creating it if missing) a storage file on disk
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<VirtualFileSystem<FileBlockStorage<File>>> {
        self.config.validate()?;
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let storage = FileBlockStorage::bootstrap(file, self.config.block_size)?;
        info!(
            "Opened filesystem at {} ({}-byte blocks)",
            path.display(),
            storage.block_size()
        );
        VirtualFileSystem::from_backend(Backend::new(storage))
    }

    /// Open a filesystem on top of an already prepared block storage
    pub fn open_storage<S: BlockStorage>(self, storage: S) -> Result<VirtualFileSystem<S>> {
        self.config.validate()?;
        VirtualFileSystem::from_backend(Backend::new(storage))
    }
}
