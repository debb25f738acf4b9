//! Block storage engine
//!
//! Maps a [`BlockRef`] to the byte range `ref * block_size .. (ref + 1) * block_size`
//! of a random-access host store and moves whole blocks through the codec.

use crate::core::block::{
    Block, BlockRef, DataBlock, FileIndexBlock, HeaderBlock, BLOCK_OVERHEAD, DATA_FIXED_SIZE,
    MINIMAL_HEADER_SIZE, NULL_REF,
};
use crate::error::{Result, VfsError};
use std::fs::File;
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use tracing::{debug, info, trace};

/// Smallest block that still fits every fixed block body plus a short
/// name or payload
pub const MIN_BLOCK_SIZE: u32 = 40;

/// Block-level access to a storage.
///
/// Implemented by the file-backed [`FileBlockStorage`] and by the in-memory
/// [`MemoryBlockStorage`](crate::core::memory::MemoryBlockStorage).
pub trait BlockStorage {
    /// Largest payload a single data block can carry
    fn max_bytes_per_data_block(&self) -> usize;

    /// Number of block slots known to the storage, reserved ones included
    fn block_count(&self) -> u32;

    /// Reserve `extra` block slots at the end of the storage.
    ///
    /// Returns the reference of the first reserved slot. Reservation is
    /// bookkeeping only; nothing is written until a slot is used.
    fn expand(&mut self, extra: u32) -> Result<BlockRef>;

    fn read_block(&mut self, block_ref: BlockRef) -> Result<Block>;

    fn write_block(&mut self, block_ref: BlockRef, block: Block) -> Result<()>;

    /// Push buffered writes down to the host store
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_header(&mut self) -> Result<HeaderBlock> {
        self.read_block(NULL_REF)?.into_header()
    }

    fn write_header(&mut self, header: HeaderBlock) -> Result<()> {
        self.write_block(NULL_REF, Block::Header(header))
    }

    fn read_file_index(&mut self, block_ref: BlockRef) -> Result<FileIndexBlock> {
        self.read_block(block_ref)?.into_file_index()
    }

    fn write_file_index(&mut self, block_ref: BlockRef, entry: FileIndexBlock) -> Result<()> {
        self.write_block(block_ref, Block::FileIndex(entry))
    }

    fn read_data(&mut self, block_ref: BlockRef) -> Result<DataBlock> {
        self.read_block(block_ref)?.into_data()
    }

    fn write_data(&mut self, block_ref: BlockRef, data: DataBlock) -> Result<()> {
        self.write_block(block_ref, Block::Data(data))
    }
}

/// A host store that can push written bytes down to durable media
pub trait SyncHost {
    fn sync(&mut self) -> std::io::Result<()>;
}

impl SyncHost for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

/// Purely in memory, nothing to sync
impl SyncHost for Cursor<Vec<u8>> {
    fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Check that a block size is usable and convert it to `usize`
pub fn validate_block_size(block_size: u32) -> Result<usize> {
    if block_size < MIN_BLOCK_SIZE || block_size > i32::MAX as u32 {
        return Err(VfsError::InvalidBlockSize(block_size));
    }
    Ok(block_size as usize)
}

/// Block storage on top of any seekable byte store (a `File`, a `Cursor`, ...)
pub struct FileBlockStorage<F> {
    inner: F,
    block_size: usize,
    block_count: u32,
}

impl<F: Read + Write + Seek + SyncHost> FileBlockStorage<F> {
    /// Wrap a host store whose blocks are `block_size` bytes long.
    ///
    /// The block count is derived from the current host length.
    pub fn new(mut inner: F, block_size: u32) -> Result<Self> {
        let block_size = validate_block_size(block_size)?;
        let len = inner.seek(SeekFrom::End(0))?;
        let block_count = u32::try_from(len / block_size as u64).map_err(|_| {
            VfsError::Corruption(format!("host store too large: {} bytes", len))
        })?;

        Ok(FileBlockStorage {
            inner,
            block_size,
            block_count,
        })
    }

    /// Open a host store, initializing it when empty.
    ///
    /// An existing store keeps the block size recorded in its header;
    /// `default_block_size` only applies to a fresh one.
    pub fn bootstrap(mut inner: F, default_block_size: u32) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;

        if len > 0 {
            let header = Self::read_minimal_header(&mut inner)?;
            let mut storage = Self::new(inner, header.block_size)?;
            // Full read verifies the header checksum
            storage.read_header()?;
            info!(
                "Opened existing storage: {} blocks of {} bytes",
                storage.block_count, storage.block_size
            );
            return Ok(storage);
        }

        let mut storage = Self::new(inner, default_block_size)?;
        let header_ref = storage.expand(1)?;
        debug_assert_eq!(header_ref, NULL_REF);
        storage.write_header(HeaderBlock::new(default_block_size))?;
        info!("Initialized fresh storage with {}-byte blocks", default_block_size);
        Ok(storage)
    }

    /// Read just enough of block 0 to learn the block size
    pub fn read_minimal_header(inner: &mut F) -> Result<HeaderBlock> {
        inner.seek(SeekFrom::Start(0))?;
        let mut prefix = [0u8; MINIMAL_HEADER_SIZE];
        inner.read_exact(&mut prefix).map_err(short_read)?;
        HeaderBlock::decode_minimal(&prefix)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn get_ref(&self) -> &F {
        &self.inner
    }

    /// Return ownership of the host store
    pub fn into_inner(self) -> F {
        self.inner
    }

    fn offset(&self, block_ref: BlockRef) -> u64 {
        block_ref as u64 * self.block_size as u64
    }
}

impl<F: Read + Write + Seek + SyncHost> BlockStorage for FileBlockStorage<F> {
    fn max_bytes_per_data_block(&self) -> usize {
        self.block_size - BLOCK_OVERHEAD - DATA_FIXED_SIZE
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn expand(&mut self, extra: u32) -> Result<BlockRef> {
        let first = self.block_count;
        self.block_count = first.checked_add(extra).ok_or_else(|| {
            VfsError::InvariantViolation(format!(
                "cannot reserve {} more blocks past {}",
                extra, first
            ))
        })?;
        debug!("Reserved blocks {}..{}", first, self.block_count);
        Ok(first)
    }

    fn read_block(&mut self, block_ref: BlockRef) -> Result<Block> {
        trace!("Reading block {}", block_ref);
        let offset = self.offset(block_ref);
        self.inner.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; self.block_size];
        self.inner.read_exact(&mut buffer).map_err(short_read)?;

        Block::decode(&buffer)
    }

    fn write_block(&mut self, block_ref: BlockRef, block: Block) -> Result<()> {
        trace!("Writing {:?} block {}", block.kind(), block_ref);
        let bytes = block.encode(self.block_size)?;

        let offset = self.offset(block_ref);
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(&bytes)?;

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        self.inner.sync()?;
        trace!("Synced host store");
        Ok(())
    }
}

fn short_read(err: std::io::Error) -> VfsError {
    if err.kind() == ErrorKind::UnexpectedEof {
        VfsError::corruption("unexpected end of file")
    } else {
        VfsError::Io(err)
    }
}
