//! Block codec
//!
//! Every block is exactly `block_size` bytes:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────┐
//! │ signature u32│ crc32 u32    │ body (block_size - 8 bytes)  │
//! └──────────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! All integers are big-endian. The checksum covers the whole body,
//! including the zero padding after the last field.

use crate::error::{Result, VfsError};

/// Address of a fixed-size block slot. Reference 0 is the header block and
/// doubles as the end-of-chain sentinel in every linked structure.
pub type BlockRef = u32;

/// Header block location and universal "no link" value
pub const NULL_REF: BlockRef = 0;

/// Signature + checksum
pub const BLOCK_OVERHEAD: usize = 8;

/// next + prev + firstVacant + blockSize
pub const HEADER_BODY_SIZE: usize = 16;

/// next + prev + firstData + lastData + fileSize + nameByteLen
pub const FILE_INDEX_FIXED_SIZE: usize = 28;

/// next + dataLen
pub const DATA_FIXED_SIZE: usize = 8;

/// Bytes needed to recover the block size of an existing store
pub const MINIMAL_HEADER_SIZE: usize = BLOCK_OVERHEAD + HEADER_BODY_SIZE;

/// Block kinds, discriminated on disk by their signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockKind {
    Header = 0x4454_4131,
    FileIndex = 0x4454_4649,
    Data = 0x4454_4644,
}

impl BlockKind {
    pub fn signature(self) -> u32 {
        self as u32
    }

    pub fn from_signature(signature: u32) -> Result<Self> {
        match signature {
            s if s == BlockKind::Header as u32 => Ok(BlockKind::Header),
            s if s == BlockKind::FileIndex as u32 => Ok(BlockKind::FileIndex),
            s if s == BlockKind::Data as u32 => Ok(BlockKind::Data),
            other => Err(VfsError::Corruption(format!(
                "unknown block signature {:#010x}",
                other
            ))),
        }
    }
}

/// Storage header, always at reference 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    /// First entry of the file index
    pub next_index_block: BlockRef,
    /// Last entry of the file index
    pub prev_index_block: BlockRef,
    /// Head of the free-list
    pub first_vacant_block: BlockRef,
    /// Fixed for the lifetime of the storage
    pub block_size: u32,
}

impl HeaderBlock {
    pub fn new(block_size: u32) -> Self {
        HeaderBlock {
            block_size,
            ..Default::default()
        }
    }

    /// Parse the leading header fields without verifying the checksum.
    ///
    /// Used to recover the block size before the full block can be read.
    pub fn decode_minimal(prefix: &[u8]) -> Result<Self> {
        if prefix.len() < MINIMAL_HEADER_SIZE {
            return Err(VfsError::corruption("unexpected end of file"));
        }
        let mut reader = BodyReader::new(prefix);
        let signature = reader.u32()?;
        if BlockKind::from_signature(signature)? != BlockKind::Header {
            return Err(VfsError::corruption("block signature mismatch"));
        }
        let _checksum = reader.u32()?;
        Self::decode_body(&mut reader)
    }

    fn decode_body(reader: &mut BodyReader<'_>) -> Result<Self> {
        let next_index_block = reader.u32()?;
        let prev_index_block = reader.u32()?;
        let first_vacant_block = reader.u32()?;
        let block_size = reader.i32()?;
        let block_size = u32::try_from(block_size)
            .map_err(|_| VfsError::Corruption(format!("negative block size {}", block_size)))?;
        Ok(HeaderBlock {
            next_index_block,
            prev_index_block,
            first_vacant_block,
            block_size,
        })
    }
}

/// Per-file metadata entry in the doubly linked file index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndexBlock {
    pub next_index_block: BlockRef,
    pub prev_index_block: BlockRef,
    pub first_data_block: BlockRef,
    pub last_data_block: BlockRef,
    pub file_size: u64,
    pub file_name: String,
}

impl FileIndexBlock {
    pub fn new(file_name: impl Into<String>) -> Self {
        FileIndexBlock {
            file_name: file_name.into(),
            ..Default::default()
        }
    }
}

/// One chunk of file content; also the shape of a free-list entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBlock {
    pub next_data_block: BlockRef,
    pub file_data: Vec<u8>,
}

impl DataBlock {
    /// A payload-less block that only carries a link
    pub fn link(next_data_block: BlockRef) -> Self {
        DataBlock {
            next_data_block,
            file_data: Vec::new(),
        }
    }
}

/// A decoded block of any kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Header(HeaderBlock),
    FileIndex(FileIndexBlock),
    Data(DataBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Header(_) => BlockKind::Header,
            Block::FileIndex(_) => BlockKind::FileIndex,
            Block::Data(_) => BlockKind::Data,
        }
    }

    /// Serialize into exactly `block_size` bytes
    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>> {
        let capacity = block_size.saturating_sub(BLOCK_OVERHEAD);
        let mut body = Vec::with_capacity(capacity);

        match self {
            Block::Header(header) => {
                let recorded = i32::try_from(header.block_size)
                    .map_err(|_| VfsError::InvalidBlockSize(header.block_size))?;
                body.extend_from_slice(&header.next_index_block.to_be_bytes());
                body.extend_from_slice(&header.prev_index_block.to_be_bytes());
                body.extend_from_slice(&header.first_vacant_block.to_be_bytes());
                body.extend_from_slice(&recorded.to_be_bytes());
            }
            Block::FileIndex(entry) => {
                let name = encode_name(&entry.file_name);
                let room = capacity.saturating_sub(FILE_INDEX_FIXED_SIZE);
                if name.len() > room {
                    return Err(VfsError::Oversize {
                        what: "File name",
                        len: name.len(),
                        capacity: room,
                    });
                }
                let file_size = i64::try_from(entry.file_size).map_err(|_| {
                    VfsError::InvariantViolation(format!(
                        "file size {} does not fit the on-disk field",
                        entry.file_size
                    ))
                })?;
                body.extend_from_slice(&entry.next_index_block.to_be_bytes());
                body.extend_from_slice(&entry.prev_index_block.to_be_bytes());
                body.extend_from_slice(&entry.first_data_block.to_be_bytes());
                body.extend_from_slice(&entry.last_data_block.to_be_bytes());
                body.extend_from_slice(&file_size.to_be_bytes());
                body.extend_from_slice(&(name.len() as i32).to_be_bytes());
                body.extend_from_slice(&name);
            }
            Block::Data(data) => {
                let room = capacity.saturating_sub(DATA_FIXED_SIZE);
                if data.file_data.len() > room {
                    return Err(VfsError::Oversize {
                        what: "Data portion",
                        len: data.file_data.len(),
                        capacity: room,
                    });
                }
                body.extend_from_slice(&data.next_data_block.to_be_bytes());
                body.extend_from_slice(&(data.file_data.len() as i32).to_be_bytes());
                body.extend_from_slice(&data.file_data);
            }
        }

        if body.len() > capacity {
            return Err(VfsError::Oversize {
                what: "Block body",
                len: body.len(),
                capacity,
            });
        }
        body.resize(capacity, 0);

        let mut bytes = Vec::with_capacity(block_size);
        bytes.extend_from_slice(&self.kind().signature().to_be_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Deserialize a whole block, verifying signature and checksum
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_OVERHEAD {
            return Err(VfsError::corruption("unexpected end of file"));
        }
        let mut reader = BodyReader::new(bytes);
        let kind = BlockKind::from_signature(reader.u32()?)?;
        let expected = reader.u32()?;
        let body = &bytes[BLOCK_OVERHEAD..];
        if crc32fast::hash(body) != expected {
            return Err(VfsError::corruption("checksum mismatch"));
        }

        let mut reader = BodyReader::new(body);
        match kind {
            BlockKind::Header => Ok(Block::Header(HeaderBlock::decode_body(&mut reader)?)),
            BlockKind::FileIndex => {
                let next_index_block = reader.u32()?;
                let prev_index_block = reader.u32()?;
                let first_data_block = reader.u32()?;
                let last_data_block = reader.u32()?;
                let file_size = reader.i64()?;
                let file_size = u64::try_from(file_size).map_err(|_| {
                    VfsError::Corruption(format!("negative file size {}", file_size))
                })?;
                let name_len = reader.len()?;
                let file_name = decode_name(reader.take(name_len)?)?;
                Ok(Block::FileIndex(FileIndexBlock {
                    next_index_block,
                    prev_index_block,
                    first_data_block,
                    last_data_block,
                    file_size,
                    file_name,
                }))
            }
            BlockKind::Data => {
                let next_data_block = reader.u32()?;
                let data_len = reader.len()?;
                let file_data = reader.take(data_len)?.to_vec();
                Ok(Block::Data(DataBlock {
                    next_data_block,
                    file_data,
                }))
            }
        }
    }

    pub fn into_header(self) -> Result<HeaderBlock> {
        match self {
            Block::Header(header) => Ok(header),
            other => Err(kind_mismatch(BlockKind::Header, other.kind())),
        }
    }

    pub fn into_file_index(self) -> Result<FileIndexBlock> {
        match self {
            Block::FileIndex(entry) => Ok(entry),
            other => Err(kind_mismatch(BlockKind::FileIndex, other.kind())),
        }
    }

    pub fn into_data(self) -> Result<DataBlock> {
        match self {
            Block::Data(data) => Ok(data),
            other => Err(kind_mismatch(BlockKind::Data, other.kind())),
        }
    }
}

fn kind_mismatch(expected: BlockKind, found: BlockKind) -> VfsError {
    VfsError::Corruption(format!(
        "block signature mismatch: expected {:?}, found {:?}",
        expected, found
    ))
}

/// File names are stored as UTF-16BE, two bytes per code unit
fn encode_name(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

fn decode_name(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(VfsError::corruption("file name has odd byte length"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| VfsError::corruption("file name is not valid UTF-16"))
}

/// Bounds-checked big-endian reader over a block body
struct BodyReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BodyReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BodyReader { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.bytes.len() - self.offset;
        if n > remaining {
            return Err(VfsError::Corruption(format!(
                "declared length {} exceeds remaining {} bytes",
                n, remaining
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// A length prefix; negative values are corruption
    fn len(&mut self) -> Result<usize> {
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| VfsError::Corruption(format!("negative length {}", len)))
    }
}
