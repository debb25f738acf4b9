use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("Storage is corrupted: {0}")]
    Corruption(String),

    #[error("{what} too large: {len} bytes (max: {capacity})")]
    Oversize {
        what: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File is open right now and cannot be deleted: {0}")]
    InUse(String),

    #[error("Channel was opened for reading only")]
    NotWritable,

    #[error("Channel is closed")]
    ClosedChannel,

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),

    #[error("File channel outlived its filesystem")]
    Detached,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VfsError {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        VfsError::Corruption(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;
