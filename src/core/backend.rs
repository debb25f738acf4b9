//! Allocation and file-index backend
//!
//! Owns the two linked structures rooted in the header block:
//!
//! - the free-list, a LIFO stack threaded through `next_data_block`
//!   starting at `first_vacant_block`
//! - the file index, a doubly linked list of file-index blocks between
//!   `next_index_block` (first file) and `prev_index_block` (last file)
//!
//! File content is a singly linked chain of data blocks. None of the
//! multi-block updates here are atomic: a failure part way through leaves
//! whatever was already written in place.

use crate::core::block::{BlockRef, DataBlock, FileIndexBlock, NULL_REF};
use crate::error::{Result, VfsError};
use crate::core::storage::BlockStorage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stable identifier of a file: the reference of its file-index block
pub type FileHandle = BlockRef;

/// One entry of the file index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub handle: FileHandle,
}

pub struct Backend<S> {
    storage: S,
}

impl<S: BlockStorage> Backend<S> {
    pub fn new(storage: S) -> Self {
        Backend { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Hand out exactly `count` block references.
    ///
    /// Recycled blocks come first, most recently freed first; any shortfall
    /// is covered by fresh blocks reserved at the storage end, in ascending
    /// order.
    pub fn allocate(&mut self, count: usize) -> Result<Vec<BlockRef>> {
        let mut allocated = Vec::with_capacity(count);
        if count == 0 {
            return Ok(allocated);
        }

        let mut header = self.storage.read_header()?;
        let mut block_ref = header.first_vacant_block;
        while allocated.len() < count && block_ref != NULL_REF {
            let block = self.storage.read_data(block_ref)?;
            allocated.push(block_ref);
            block_ref = block.next_data_block;
        }
        header.first_vacant_block = block_ref;
        self.storage.write_header(header)?;
        let recycled = allocated.len();

        if allocated.len() < count {
            let shortfall = u32::try_from(count - allocated.len()).map_err(|_| {
                VfsError::InvariantViolation(format!("cannot allocate {} blocks", count))
            })?;
            let first = self.storage.expand(shortfall)?;
            allocated.extend(first..first + shortfall);
        }

        debug!(
            "Allocated {} blocks ({} recycled, {} fresh)",
            count,
            recycled,
            count - recycled
        );
        Ok(allocated)
    }

    /// Push an already linked chain `first ..= last` onto the free-list.
    ///
    /// The chain itself is never walked: only `last` is relinked.
    pub fn free(&mut self, first: BlockRef, last: BlockRef) -> Result<()> {
        let mut header = self.storage.read_header()?;

        let mut last_block = self.storage.read_data(last)?;
        last_block.next_data_block = header.first_vacant_block;
        self.storage.write_data(last, last_block)?;

        header.first_vacant_block = first;
        self.storage.write_header(header)?;

        debug!("Freed chain {}..={}", first, last);
        Ok(())
    }

    /// List all files in index (= creation) order
    pub fn build_index(&mut self) -> Result<Vec<FileInfo>> {
        let header = self.storage.read_header()?;
        let limit = self.storage.block_count() as usize;
        let mut index = Vec::new();

        let mut handle = header.next_index_block;
        while handle != NULL_REF {
            if index.len() >= limit {
                return Err(VfsError::corruption("file index contains a cycle"));
            }
            let entry = self.storage.read_file_index(handle)?;
            index.push(FileInfo {
                name: entry.file_name,
                size: entry.file_size,
                handle,
            });
            handle = entry.next_index_block;
        }

        Ok(index)
    }

    /// Append a new empty file to the end of the index
    pub fn create_file(&mut self, name: &str) -> Result<FileHandle> {
        let handle = self.allocate(1)?[0];

        // Re-read after allocating: allocation moves the free-list head
        let mut header = self.storage.read_header()?;
        let prev = header.prev_index_block;

        let mut entry = FileIndexBlock::new(name);
        entry.prev_index_block = prev;
        entry.next_index_block = NULL_REF;
        if let Err(e) = self.storage.write_file_index(handle, entry) {
            // Nothing links to the block yet, hand it back
            self.storage.write_data(handle, DataBlock::link(NULL_REF))?;
            self.free(handle, handle)?;
            return Err(e);
        }

        if prev != NULL_REF {
            let mut prev_entry = self.storage.read_file_index(prev)?;
            prev_entry.next_index_block = handle;
            self.storage.write_file_index(prev, prev_entry)?;
        } else {
            header.next_index_block = handle;
        }
        header.prev_index_block = handle;
        self.storage.write_header(header)?;

        debug!("Created file '{}' with handle {}", name, handle);
        Ok(handle)
    }

    /// Unlink a file from the index and free its index block together with
    /// its whole data chain
    pub fn delete_file(&mut self, handle: FileHandle) -> Result<()> {
        let entry = self.storage.read_file_index(handle)?;
        let chain = chain_bounds(handle, &entry)?;

        let prev = entry.prev_index_block;
        let next = entry.next_index_block;
        if prev == NULL_REF || next == NULL_REF {
            let mut header = self.storage.read_header()?;
            if prev == NULL_REF {
                header.next_index_block = next;
            }
            if next == NULL_REF {
                header.prev_index_block = prev;
            }
            self.storage.write_header(header)?;
        }
        if prev != NULL_REF {
            let mut prev_entry = self.storage.read_file_index(prev)?;
            prev_entry.next_index_block = next;
            self.storage.write_file_index(prev, prev_entry)?;
        }
        if next != NULL_REF {
            let mut next_entry = self.storage.read_file_index(next)?;
            next_entry.prev_index_block = prev;
            self.storage.write_file_index(next, next_entry)?;
        }

        // The index block becomes the head of its own data chain, so one
        // free() returns everything
        let (first, last) = chain.unwrap_or((NULL_REF, handle));
        self.storage.write_data(handle, DataBlock::link(first))?;
        self.free(handle, last)?;

        debug!(
            "Deleted file '{}' (handle {}, {} bytes)",
            entry.file_name, handle, entry.file_size
        );
        Ok(())
    }

    /// Read the whole content of a file.
    ///
    /// The result is always `file_size` bytes long; should the chain end
    /// early, the remainder stays zero-filled.
    pub fn load_file(&mut self, handle: FileHandle) -> Result<Vec<u8>> {
        let entry = self.storage.read_file_index(handle)?;
        let size = usize::try_from(entry.file_size).map_err(|_| {
            VfsError::Corruption(format!("file size {} is not addressable", entry.file_size))
        })?;
        let limit = self.storage.block_count();
        let room = self.storage.max_bytes_per_data_block() as u64 * limit as u64;
        if entry.file_size > room {
            return Err(VfsError::Corruption(format!(
                "file size {} exceeds the whole storage",
                entry.file_size
            )));
        }
        let mut content = vec![0u8; size];

        let mut hops = 0u32;
        let mut filled = 0;
        let mut block_ref = entry.first_data_block;
        while block_ref != NULL_REF && filled < size {
            if hops >= limit {
                return Err(VfsError::corruption("data chain contains a cycle"));
            }
            hops += 1;

            let block = self.storage.read_data(block_ref)?;
            let portion = (size - filled).min(block.file_data.len());
            content[filled..filled + portion].copy_from_slice(&block.file_data[..portion]);
            filled += portion;
            block_ref = block.next_data_block;
        }

        debug!("Loaded {} bytes from handle {}", size, handle);
        Ok(content)
    }

    /// Replace the whole content of a file
    pub fn store_file(&mut self, handle: FileHandle, content: &[u8]) -> Result<()> {
        let mut entry = self.storage.read_file_index(handle)?;

        if let Some((first, last)) = chain_bounds(handle, &entry)? {
            self.free(first, last)?;
        }

        if content.is_empty() {
            entry.file_size = 0;
            entry.first_data_block = NULL_REF;
            entry.last_data_block = NULL_REF;
            self.storage.write_file_index(handle, entry)?;
            debug!("Stored empty content to handle {}", handle);
            return Ok(());
        }

        let per_block = self.storage.max_bytes_per_data_block();
        if per_block == 0 {
            return Err(VfsError::InvariantViolation(
                "data blocks cannot carry any payload".to_string(),
            ));
        }
        let block_count = content.len().div_ceil(per_block);
        let refs = self.allocate(block_count)?;

        for (k, chunk) in content.chunks(per_block).enumerate() {
            let next = refs.get(k + 1).copied().unwrap_or(NULL_REF);
            self.storage.write_data(
                refs[k],
                DataBlock {
                    next_data_block: next,
                    file_data: chunk.to_vec(),
                },
            )?;
        }

        entry.file_size = content.len() as u64;
        entry.first_data_block = refs[0];
        entry.last_data_block = refs[refs.len() - 1];
        self.storage.write_file_index(handle, entry)?;

        debug!(
            "Stored {} bytes to handle {} in {} blocks",
            content.len(),
            handle,
            block_count
        );
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush()
    }
}

/// `Some((first, last))` for a non-empty chain, `None` for an empty one
fn chain_bounds(handle: FileHandle, entry: &FileIndexBlock) -> Result<Option<(BlockRef, BlockRef)>> {
    match (entry.first_data_block, entry.last_data_block) {
        (NULL_REF, NULL_REF) => Ok(None),
        (NULL_REF, _) | (_, NULL_REF) => Err(VfsError::InvariantViolation(format!(
            "file {} has data chain bounds {}..={}",
            handle, entry.first_data_block, entry.last_data_block
        ))),
        (first, last) => Ok(Some((first, last))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{Block, HeaderBlock};
    use crate::core::memory::MemoryBlockStorage;
    use crate::core::storage::FileBlockStorage;
    use std::io::Cursor;

    fn header(next: BlockRef, prev: BlockRef, vacant: BlockRef) -> HeaderBlock {
        HeaderBlock {
            next_index_block: next,
            prev_index_block: prev,
            first_vacant_block: vacant,
            block_size: 0,
        }
    }

    fn entry(next: BlockRef, prev: BlockRef, first: BlockRef, last: BlockRef) -> FileIndexBlock {
        FileIndexBlock {
            next_index_block: next,
            prev_index_block: prev,
            first_data_block: first,
            last_data_block: last,
            file_size: 0,
            file_name: String::new(),
        }
    }

    fn data(next: BlockRef, bytes: &[u8]) -> DataBlock {
        DataBlock {
            next_data_block: next,
            file_data: bytes.to_vec(),
        }
    }

    fn next_of(backend: &mut Backend<MemoryBlockStorage>, block_ref: BlockRef) -> BlockRef {
        backend
            .storage_mut()
            .read_data(block_ref)
            .unwrap()
            .next_data_block
    }

    fn vacant_head(backend: &mut Backend<MemoryBlockStorage>) -> BlockRef {
        backend.storage_mut().read_header().unwrap().first_vacant_block
    }

    #[test]
    fn test_allocate_enough_vacant_blocks() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 1));
        storage.push_data(DataBlock::link(2));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        let allocated = backend.allocate(1).unwrap();

        assert_eq!(allocated, vec![1]);
        assert_eq!(vacant_head(&mut backend), 2);
        assert_eq!(next_of(&mut backend, 2), 0);
    }

    #[test]
    fn test_allocate_too_few_vacant_blocks() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 1));
        storage.push_data(DataBlock::link(2));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        let allocated = backend.allocate(3).unwrap();

        assert_eq!(allocated, vec![1, 2, 3]);
        assert_eq!(vacant_head(&mut backend), 0);
        assert_eq!(backend.storage().block_count(), 4);
    }

    #[test]
    fn test_allocate_stack_order_then_fresh_ascending() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 2));
        storage.push_data(DataBlock::link(0));
        storage.push_data(DataBlock::link(1));

        let mut backend = Backend::new(storage);
        assert_eq!(backend.allocate(5).unwrap(), vec![2, 1, 3, 4, 5]);
    }

    #[test]
    fn test_allocate_zero_touches_nothing() {
        let mut backend = Backend::new(MemoryBlockStorage::new());
        assert!(backend.allocate(0).unwrap().is_empty());
    }

    #[test]
    fn test_free_multiple_blocks() {
        // Vacant chain: 0 -> 1 -> 3 (-> 0); chain to prepend: 2 -> 4 (-> 0)
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 1));
        storage.push_data(DataBlock::link(3));
        storage.push_data(DataBlock::link(4));
        storage.push_data(DataBlock::link(0));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        backend.free(2, 4).unwrap();

        // Vacant chain: 0 -> 2 -> 4 -> 1 -> 3 (-> 0)
        assert_eq!(vacant_head(&mut backend), 2);
        assert_eq!(next_of(&mut backend, 2), 4);
        assert_eq!(next_of(&mut backend, 4), 1);
        assert_eq!(next_of(&mut backend, 1), 3);
        assert_eq!(next_of(&mut backend, 3), 0);
    }

    #[test]
    fn test_free_single_block() {
        // Vacant chain: 0 -> 1 -> 3 (-> 0); chain to prepend: 2 (-> 0)
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 1));
        storage.push_data(DataBlock::link(3));
        storage.push_data(DataBlock::link(0));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        backend.free(2, 2).unwrap();

        assert_eq!(vacant_head(&mut backend), 2);
        assert_eq!(next_of(&mut backend, 2), 1);
        assert_eq!(next_of(&mut backend, 1), 3);
        assert_eq!(next_of(&mut backend, 3), 0);
    }

    #[test]
    fn test_free_into_empty_vacant_chain() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 0));
        storage.push_data(DataBlock::link(2));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        backend.free(1, 2).unwrap();

        assert_eq!(vacant_head(&mut backend), 1);
        assert_eq!(next_of(&mut backend, 1), 2);
        assert_eq!(next_of(&mut backend, 2), 0);
    }

    #[test]
    fn test_free_then_allocate_reverses_order() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let refs = backend.allocate(3).unwrap();
        for &r in &refs {
            backend.storage_mut().write_data(r, DataBlock::link(0)).unwrap();
            backend.free(r, r).unwrap();
        }

        let mut reversed = refs.clone();
        reversed.reverse();
        assert_eq!(backend.allocate(3).unwrap(), reversed);
    }

    #[test]
    fn test_build_index() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 2, 0));
        storage.push_file_index(FileIndexBlock {
            file_size: 22,
            file_name: "foo".to_string(),
            ..entry(2, 0, 0, 0)
        });
        storage.push_file_index(FileIndexBlock {
            file_size: 33,
            file_name: "bar".to_string(),
            ..entry(0, 1, 0, 0)
        });

        let mut backend = Backend::new(storage);
        let index = backend.build_index().unwrap();

        assert_eq!(
            index,
            vec![
                FileInfo {
                    name: "foo".to_string(),
                    size: 22,
                    handle: 1
                },
                FileInfo {
                    name: "bar".to_string(),
                    size: 33,
                    handle: 2
                },
            ]
        );
    }

    #[test]
    fn test_build_index_detects_cycle() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(entry(1, 0, 0, 0));

        let mut backend = Backend::new(storage);
        assert!(matches!(
            backend.build_index(),
            Err(VfsError::Corruption(_))
        ));
    }

    #[test]
    fn test_create_file_in_empty_index() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let created = backend.create_file("foo").unwrap();

        let header = backend.storage_mut().read_header().unwrap();
        assert_eq!(header.next_index_block, created);
        assert_eq!(header.prev_index_block, created);

        let created_entry = backend.storage_mut().read_file_index(created).unwrap();
        assert_eq!(created_entry.next_index_block, 0);
        assert_eq!(created_entry.prev_index_block, 0);
        assert_eq!(created_entry.file_size, 0);
        assert_eq!(created_entry.file_name, "foo");
    }

    #[test]
    fn test_create_file_in_non_empty_index() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(entry(0, 0, 0, 0));

        let mut backend = Backend::new(storage);
        let created = backend.create_file("foo").unwrap();

        let header = backend.storage_mut().read_header().unwrap();
        assert_eq!(header.next_index_block, 1);
        assert_eq!(header.prev_index_block, created);

        let first = backend.storage_mut().read_file_index(1).unwrap();
        assert_eq!(first.next_index_block, created);
        assert_eq!(first.prev_index_block, 0);

        let created_entry = backend.storage_mut().read_file_index(created).unwrap();
        assert_eq!(created_entry.next_index_block, 0);
        assert_eq!(created_entry.prev_index_block, 1);
    }

    #[test]
    fn test_create_file_reuses_vacant_block_without_losing_free_list() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(0, 0, 1));
        storage.push_data(DataBlock::link(2));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        assert_eq!(backend.create_file("foo").unwrap(), 1);
        assert_eq!(vacant_head(&mut backend), 2);
        assert_eq!(backend.create_file("bar").unwrap(), 2);
        assert_eq!(vacant_head(&mut backend), 0);
    }

    #[test]
    fn test_delete_non_empty_file() {
        // File index: 0 <-> 2 <-> 1 (<-> 0); data chains: 1 -> 3, 2 empty
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(2, 1, 0));
        storage.push_file_index(entry(0, 2, 3, 3));
        storage.push_file_index(entry(1, 0, 0, 0));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        backend.delete_file(1).unwrap();

        let h = backend.storage_mut().read_header().unwrap();
        assert_eq!((h.next_index_block, h.prev_index_block), (2, 2));
        let remaining = backend.storage_mut().read_file_index(2).unwrap();
        assert_eq!(
            (remaining.next_index_block, remaining.prev_index_block),
            (0, 0)
        );

        // Vacant chain: 0 -> 1 -> 3 (-> 0)
        assert_eq!(h.first_vacant_block, 1);
        assert_eq!(next_of(&mut backend, 1), 3);
        assert_eq!(next_of(&mut backend, 3), 0);
    }

    #[test]
    fn test_delete_empty_file() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(2, 1, 0));
        storage.push_file_index(entry(0, 2, 3, 3));
        storage.push_file_index(entry(1, 0, 0, 0));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        backend.delete_file(2).unwrap();

        let h = backend.storage_mut().read_header().unwrap();
        assert_eq!((h.next_index_block, h.prev_index_block), (1, 1));
        let remaining = backend.storage_mut().read_file_index(1).unwrap();
        assert_eq!(
            (remaining.next_index_block, remaining.prev_index_block),
            (0, 0)
        );

        // Vacant chain: 0 -> 2 (-> 0)
        assert_eq!(h.first_vacant_block, 2);
        assert_eq!(next_of(&mut backend, 2), 0);
    }

    #[test]
    fn test_delete_last_remaining_file() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(entry(0, 0, 2, 2));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        backend.delete_file(1).unwrap();

        let h = backend.storage_mut().read_header().unwrap();
        assert_eq!((h.next_index_block, h.prev_index_block), (0, 0));
        assert_eq!(h.first_vacant_block, 1);
        assert_eq!(next_of(&mut backend, 1), 2);
        assert_eq!(next_of(&mut backend, 2), 0);
        assert!(backend.build_index().unwrap().is_empty());
    }

    #[test]
    fn test_delete_middle_file() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let a = backend.create_file("a").unwrap();
        let b = backend.create_file("b").unwrap();
        let c = backend.create_file("c").unwrap();

        backend.delete_file(b).unwrap();

        let names: Vec<_> = backend
            .build_index()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(backend.storage_mut().read_file_index(a).unwrap().next_index_block, c);
        assert_eq!(backend.storage_mut().read_file_index(c).unwrap().prev_index_block, a);
    }

    #[test]
    fn test_delete_inconsistent_chain_is_invariant_violation() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(entry(0, 0, 2, 0));
        storage.push_data(DataBlock::link(0));

        let mut backend = Backend::new(storage);
        assert!(matches!(
            backend.delete_file(1),
            Err(VfsError::InvariantViolation(_))
        ));
        // Nothing was unlinked
        assert_eq!(backend.build_index().unwrap().len(), 1);
    }

    #[test]
    fn test_load_file() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(FileIndexBlock {
            file_size: 6,
            ..entry(0, 0, 2, 3)
        });
        storage.push_data(data(3, &[1, 2, 3]));
        storage.push_data(data(0, &[4, 5, 6]));

        let mut backend = Backend::new(storage);
        assert_eq!(backend.load_file(1).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_load_file_truncates_to_declared_size() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(FileIndexBlock {
            file_size: 4,
            ..entry(0, 0, 2, 3)
        });
        storage.push_data(data(3, &[1, 2, 3]));
        storage.push_data(data(0, &[4, 5, 6]));

        let mut backend = Backend::new(storage);
        assert_eq!(backend.load_file(1).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_load_file_short_chain_zero_fills() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(FileIndexBlock {
            file_size: 5,
            ..entry(0, 0, 2, 2)
        });
        storage.push_data(data(0, &[7, 8]));

        let mut backend = Backend::new(storage);
        assert_eq!(backend.load_file(1).unwrap(), vec![7, 8, 0, 0, 0]);
    }

    #[test]
    fn test_load_file_impossible_size_is_corruption() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(FileIndexBlock {
            file_size: 1 << 40,
            ..entry(0, 0, 0, 0)
        });

        let mut backend = Backend::new(storage);
        assert!(matches!(
            backend.load_file(1),
            Err(VfsError::Corruption(_))
        ));
    }

    #[test]
    fn test_store_file_splits_into_blocks() {
        let mut storage = MemoryBlockStorage::new();
        storage.push_header(header(1, 1, 0));
        storage.push_file_index(entry(0, 0, 0, 0));

        let mut backend = Backend::new(storage);
        backend.store_file(1, &[1, 2, 3, 4, 5, 6]).unwrap();

        let stored = backend.storage_mut().read_file_index(1).unwrap();
        assert_eq!(stored.file_size, 6);
        assert_eq!(stored.first_data_block, 2);
        assert_eq!(stored.last_data_block, 3);

        let first = backend.storage_mut().read_data(2).unwrap();
        assert_eq!(first, data(3, &[1, 2, 3, 4]));
        let second = backend.storage_mut().read_data(3).unwrap();
        assert_eq!(second, data(0, &[5, 6]));
    }

    #[test]
    fn test_store_empty_clears_chain() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let handle = backend.create_file("foo").unwrap();
        backend.store_file(handle, &[1, 2, 3, 4, 5]).unwrap();
        let count_before = backend.storage().block_count();

        backend.store_file(handle, &[]).unwrap();

        let stored = backend.storage_mut().read_file_index(handle).unwrap();
        assert_eq!(
            (stored.file_size, stored.first_data_block, stored.last_data_block),
            (0, 0, 0)
        );
        assert!(backend.load_file(handle).unwrap().is_empty());
        // The old chain went back to the free-list, nothing new was reserved
        assert_eq!(backend.storage().block_count(), count_before);
        assert_ne!(vacant_head(&mut backend), 0);
    }

    #[test]
    fn test_restore_reuses_freed_chain() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let handle = backend.create_file("foo").unwrap();
        backend.store_file(handle, &[1; 8]).unwrap();
        let count = backend.storage().block_count();

        backend.store_file(handle, &[2; 8]).unwrap();
        assert_eq!(backend.storage().block_count(), count);
        assert_eq!(backend.load_file(handle).unwrap(), vec![2; 8]);
    }

    #[test]
    fn test_store_load_fidelity() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let handle = backend.create_file("foo").unwrap();

        for len in [0usize, 1, 4, 11] {
            let content: Vec<u8> = (0..len as u8).collect();
            backend.store_file(handle, &content).unwrap();
            assert_eq!(backend.load_file(handle).unwrap(), content, "length {}", len);
        }
    }

    #[test]
    fn test_delete_returns_whole_chain_to_free_list() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let keep = backend.create_file("keep").unwrap();
        let doomed = backend.create_file("doomed").unwrap();
        backend.store_file(doomed, &[9; 10]).unwrap();
        let chain_len = 1 + 3;

        backend.delete_file(doomed).unwrap();

        let mut free = Vec::new();
        let mut r = vacant_head(&mut backend);
        while r != NULL_REF {
            free.push(r);
            r = next_of(&mut backend, r);
        }
        assert_eq!(free.len(), chain_len);
        assert_eq!(free[0], doomed);

        let index = backend.build_index().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].handle, keep);

        // Recycled blocks serve the next allocation before any fresh one
        let count = backend.storage().block_count();
        backend.allocate(chain_len).unwrap();
        assert_eq!(backend.storage().block_count(), count);
    }

    #[test]
    fn test_backend_over_encoded_storage() {
        let storage = FileBlockStorage::bootstrap(Cursor::new(Vec::new()), 40).unwrap();
        let mut backend = Backend::new(storage);

        let handle = backend.create_file("f").unwrap();
        let content: Vec<u8> = (0..100).collect();
        backend.store_file(handle, &content).unwrap();

        // 24 payload bytes per 40-byte block
        assert_eq!(backend.storage().block_count(), 2 + 5);
        assert_eq!(backend.load_file(handle).unwrap(), content);

        let bytes = backend.into_storage().into_inner().into_inner();
        let mut reopened = Backend::new(FileBlockStorage::bootstrap(Cursor::new(bytes), 512).unwrap());
        let index = reopened.build_index().unwrap();
        assert_eq!(index[0].name, "f");
        assert_eq!(index[0].size, 100);
        assert_eq!(reopened.load_file(handle).unwrap(), content);
    }

    #[test]
    fn test_oversized_name_surfaces_oversize() {
        let storage = FileBlockStorage::bootstrap(Cursor::new(Vec::new()), 40).unwrap();
        let mut backend = Backend::new(storage);
        // 40-byte block leaves 4 bytes (2 UTF-16 units) for the name
        assert!(backend.create_file("ab").is_ok());
        assert!(matches!(
            backend.create_file("abc"),
            Err(VfsError::Oversize { .. })
        ));

        // The rejected entry's block went back to the free-list
        let count = backend.storage().block_count();
        let vacant = backend.storage_mut().read_header().unwrap().first_vacant_block;
        assert_eq!(vacant, count - 1);
        assert_eq!(backend.create_file("c").unwrap(), vacant);
        assert_eq!(backend.build_index().unwrap().len(), 2);
    }

    #[test]
    fn test_index_entries_keep_other_block_kinds_apart() {
        let mut backend = Backend::new(MemoryBlockStorage::formatted());
        let handle = backend.create_file("foo").unwrap();
        assert!(matches!(
            backend.storage().get(handle),
            Some(Block::FileIndex(_))
        ));
        assert!(matches!(
            backend.storage_mut().read_data(handle),
            Err(VfsError::Corruption(_))
        ));
    }
}
