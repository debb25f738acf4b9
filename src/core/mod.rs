//! Storage core: block codec, block storage, allocation backend and file
//! buffer entities

pub mod backend;
pub mod block;
pub mod entity;
pub mod memory;
pub mod storage;

pub use crate::error::{Result, VfsError};
pub use backend::{Backend, FileHandle, FileInfo};
pub use block::{Block, BlockKind, BlockRef, DataBlock, FileIndexBlock, HeaderBlock, NULL_REF};
pub use entity::{ContentStore, FileEntity, MIN_CAPACITY};
pub use memory::MemoryBlockStorage;
pub use storage::{BlockStorage, FileBlockStorage, SyncHost, MIN_BLOCK_SIZE};
