//! In-memory block storage
//!
//! Keeps decoded blocks in a vector and skips the codec entirely, which makes
//! it handy for exercising the backend against hand-built block layouts.

use crate::core::block::{Block, BlockRef, DataBlock, FileIndexBlock, HeaderBlock};
use crate::error::{Result, VfsError};
use crate::core::storage::BlockStorage;

/// Default data block payload size, kept tiny so tests span several blocks
pub const DEFAULT_MAX_BYTES_PER_DATA_BLOCK: usize = 4;

#[derive(Debug, Clone)]
pub struct MemoryBlockStorage {
    blocks: Vec<Option<Block>>,
    max_bytes_per_data_block: usize,
}

impl MemoryBlockStorage {
    /// Empty storage without even a header block
    pub fn new() -> Self {
        Self::with_data_block_size(DEFAULT_MAX_BYTES_PER_DATA_BLOCK)
    }

    pub fn with_data_block_size(max_bytes_per_data_block: usize) -> Self {
        MemoryBlockStorage {
            blocks: Vec::new(),
            max_bytes_per_data_block,
        }
    }

    /// Storage holding only a fresh header at reference 0
    pub fn formatted() -> Self {
        let mut storage = Self::new();
        storage.push_header(HeaderBlock::default());
        storage
    }

    /// Append a block at the next reference and return that reference
    pub fn push(&mut self, block: Block) -> BlockRef {
        self.blocks.push(Some(block));
        (self.blocks.len() - 1) as BlockRef
    }

    pub fn push_header(&mut self, header: HeaderBlock) -> BlockRef {
        self.push(Block::Header(header))
    }

    pub fn push_file_index(&mut self, entry: FileIndexBlock) -> BlockRef {
        self.push(Block::FileIndex(entry))
    }

    pub fn push_data(&mut self, data: DataBlock) -> BlockRef {
        self.push(Block::Data(data))
    }

    /// Peek at a slot; `None` for reserved slots never written
    pub fn get(&self, block_ref: BlockRef) -> Option<&Block> {
        self.blocks.get(block_ref as usize).and_then(Option::as_ref)
    }

    fn slot(&self, block_ref: BlockRef) -> Result<&Option<Block>> {
        self.blocks.get(block_ref as usize).ok_or_else(|| {
            VfsError::Corruption(format!("block {} is beyond the storage end", block_ref))
        })
    }
}

impl Default for MemoryBlockStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStorage for MemoryBlockStorage {
    fn max_bytes_per_data_block(&self) -> usize {
        self.max_bytes_per_data_block
    }

    fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn expand(&mut self, extra: u32) -> Result<BlockRef> {
        let first = self.blocks.len() as BlockRef;
        self.blocks
            .resize_with(self.blocks.len() + extra as usize, || None);
        Ok(first)
    }

    fn read_block(&mut self, block_ref: BlockRef) -> Result<Block> {
        self.slot(block_ref)?.clone().ok_or_else(|| {
            VfsError::Corruption(format!("block {} was reserved but never written", block_ref))
        })
    }

    fn write_block(&mut self, block_ref: BlockRef, block: Block) -> Result<()> {
        if let Block::Data(data) = &block {
            if data.file_data.len() > self.max_bytes_per_data_block {
                return Err(VfsError::Oversize {
                    what: "Data portion",
                    len: data.file_data.len(),
                    capacity: self.max_bytes_per_data_block,
                });
            }
        }
        self.slot(block_ref)?;
        self.blocks[block_ref as usize] = Some(block);
        Ok(())
    }
}
