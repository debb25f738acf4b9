//! File buffer entity
//!
//! One entity exists per file handle and is shared by every channel open on
//! that file. The content is loaded when the first channel opens and written
//! back when the last one closes, provided something changed in between.

use crate::error::{Result, VfsError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Smallest buffer an entity grows to on its first write
pub const MIN_CAPACITY: usize = 16;

/// Where an entity loads its content from and stores it back to
pub trait ContentStore {
    fn load(&self) -> Result<Vec<u8>>;
    fn store(&self, content: &[u8]) -> Result<()>;
}

#[derive(Debug, Default)]
struct EntityState {
    /// Bytes past `size` are always zero
    buffer: Vec<u8>,
    size: usize,
    open_count: usize,
    dirty: bool,
}

pub struct FileEntity<C> {
    name: String,
    store: C,
    pins: AtomicUsize,
    state: RwLock<EntityState>,
}

impl<C: ContentStore> FileEntity<C> {
    pub fn new(name: impl Into<String>, store: C) -> Self {
        FileEntity {
            name: name.into(),
            store,
            pins: AtomicUsize::new(0),
            state: RwLock::new(EntityState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_store(&self) -> &C {
        &self.store
    }

    /// Register one more open reference, loading the content on the first.
    ///
    /// Exception to load-on-first-open: a buffer left dirty by a failed
    /// write-back is kept, dirty flag included, instead of being replaced by
    /// the stale stored content.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.open_count == 0 && !state.dirty {
            let content = self.store.load()?;
            state.size = content.len();
            state.buffer = content;
            debug!("Loaded '{}' into memory ({} bytes)", self.name, state.size);
        }
        state.open_count += 1;
        Ok(())
    }

    /// Drop one open reference, storing the content back after the last one
    /// if it was modified.
    ///
    /// The reference is released even when the write-back fails; the buffer
    /// then stays dirty.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.open_count == 0 {
            return Err(VfsError::InvariantViolation(format!(
                "'{}' closed more often than opened",
                self.name
            )));
        }
        state.open_count -= 1;

        if state.open_count == 0 && state.dirty {
            let size = state.size;
            self.store.store(&state.buffer[..size])?;
            state.dirty = false;
            debug!("Wrote '{}' back ({} bytes)", self.name, size);
        }
        Ok(())
    }

    /// Copy bytes starting at `position` into `dst`.
    ///
    /// Returns `None` at or past the end of the file.
    pub fn read(&self, dst: &mut [u8], position: usize) -> Option<usize> {
        let state = self.state.read();
        if position >= state.size {
            return None;
        }
        let count = dst.len().min(state.size - position);
        dst[..count].copy_from_slice(&state.buffer[position..position + count]);
        Some(count)
    }

    /// Copy `src` into the file at `position`, extending it as needed.
    ///
    /// A gap between the old end and `position` reads back as zeros.
    pub fn write(&self, src: &[u8], position: usize) -> Result<usize> {
        let end = position.checked_add(src.len()).ok_or_else(|| {
            VfsError::InvariantViolation(format!("write past {} overflows", position))
        })?;

        let mut state = self.state.write();
        if end > state.buffer.len() {
            grow(&mut state.buffer, end)?;
        }
        state.dirty = true;
        if end > state.size {
            state.size = end;
        }
        state.buffer[position..end].copy_from_slice(src);
        Ok(src.len())
    }

    /// Logical file size as seen by open channels
    pub fn size(&self) -> usize {
        self.state.read().size
    }

    pub fn capacity(&self) -> usize {
        self.state.read().buffer.len()
    }

    pub fn open_count(&self) -> usize {
        self.state.read().open_count
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Mark the entity as claimed by a channel that is open or being opened
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unpin(&self) {
        self.pins.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::SeqCst) > 0
    }
}

/// Double `buffer` (starting from [`MIN_CAPACITY`]) until it holds `end`
/// bytes, failing instead of aborting when the memory cannot be had
fn grow(buffer: &mut Vec<u8>, end: usize) -> Result<()> {
    let mut capacity = buffer.len().max(MIN_CAPACITY);
    while capacity < end {
        capacity = capacity.checked_mul(2).unwrap_or(end);
    }

    let too_large = || VfsError::Oversize {
        what: "File buffer",
        len: end,
        capacity: isize::MAX as usize,
    };
    if capacity > isize::MAX as usize {
        return Err(too_large());
    }
    buffer
        .try_reserve_exact(capacity - buffer.len())
        .map_err(|_| too_large())?;
    buffer.resize(capacity, 0);
    Ok(())
}
