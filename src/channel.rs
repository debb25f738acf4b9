//! Byte channels over open files

use crate::core::storage::BlockStorage;
use crate::error::{Result, VfsError};
use crate::SharedEntity;
use tracing::warn;

/// An open file, read-only or read-write
///
/// Every channel keeps its own cursor, used by [`read`](Self::read) and
/// [`write`](Self::write) and advanced by the bytes actually transferred.
/// The positional variants leave the cursor alone.
///
/// Dropping a channel closes it.
pub struct VirtualFileChannel<S: BlockStorage> {
    entity: SharedEntity<S>,
    writable: bool,
    position: usize,
    open: bool,
}

impl<S: BlockStorage> VirtualFileChannel<S> {
    pub(crate) fn new(entity: SharedEntity<S>, writable: bool) -> Self {
        VirtualFileChannel {
            entity,
            writable,
            position: 0,
            open: true,
        }
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Read at the cursor; `None` at end of file
    pub fn read(&mut self, dst: &mut [u8]) -> Result<Option<usize>> {
        let read = self.read_at(dst, self.position)?;
        if let Some(count) = read {
            self.position += count;
        }
        Ok(read)
    }

    /// Read at `position`; `None` at or past end of file
    pub fn read_at(&self, dst: &mut [u8], position: usize) -> Result<Option<usize>> {
        self.ensure_open()?;
        Ok(self.entity.read(dst, position))
    }

    /// Write at the cursor
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let written = self.write_at(src, self.position)?;
        self.position += written;
        Ok(written)
    }

    pub fn write_at(&self, src: &[u8], position: usize) -> Result<usize> {
        if !self.writable {
            return Err(VfsError::NotWritable);
        }
        self.ensure_open()?;
        self.entity.write(src, position)
    }

    pub fn position(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.position)
    }

    /// Move the cursor; positions past the end are allowed
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.ensure_open()?;
        self.position = position;
        Ok(())
    }

    /// Current file size as seen through open channels
    pub fn size(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.entity.size())
    }

    /// Close the channel; closing again does nothing.
    ///
    /// When this was the last channel on a modified file, the content is
    /// written back and any failure of that write-back is returned. The
    /// channel counts as closed either way.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let result = self.entity.close();
        self.entity.unpin();
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(VfsError::ClosedChannel)
        }
    }
}

impl<S: BlockStorage> Drop for VirtualFileChannel<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to write back '{}' on drop: {}", self.entity.name(), e);
        }
    }
}
