//! Scratch buffer pool for the marshal path.
//!
//! Every checkout is scoped: a [`PooledBuffer`] hands its entry back to the
//! pool when dropped, on success and error paths alike. The entry goes back
//! with its storage detached, so the pool never aliases bytes a caller still
//! holds. What survives between checkouts is the size hint, which lets the
//! next marshal allocate once at roughly the right capacity.

// Rust guideline compliant 2026-02

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Capacity used for a buffer that has never marshaled anything.
pub const INITIAL_SIZE_HINT: usize = 16;

/// Upper bound on the remembered size hint.
const MAX_SIZE_HINT: usize = i32::MAX as usize;

/// Default number of idle entries retained by a pool.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// A pooled scratch buffer plus the output length of its last use.
#[derive(Debug)]
pub struct CachedBuffer {
    size_hint: usize,
    buf: Vec<u8>,
}

impl CachedBuffer {
    fn new() -> Self {
        Self {
            size_hint: INITIAL_SIZE_HINT,
            buf: Vec::new(),
        }
    }

    /// Attach fresh storage sized to the previous output.
    pub fn prepare(&mut self) -> &mut Vec<u8> {
        self.buf = Vec::with_capacity(self.size_hint);
        &mut self.buf
    }

    /// Take the written bytes out, remembering their length for next time.
    pub fn detach(&mut self) -> Vec<u8> {
        let out = std::mem::take(&mut self.buf);
        self.size_hint = out.len().min(MAX_SIZE_HINT);
        out
    }

    /// Capacity the next [`prepare`](Self::prepare) will allocate.
    pub fn size_hint(&self) -> usize {
        self.size_hint
    }
}

/// Internally synchronized pool of [`CachedBuffer`]s.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<CachedBuffer>>,
    max_idle: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl BufferPool {
    /// Create a pool that keeps at most `max_idle` entries between checkouts.
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Check out an entry, creating one if the pool is empty.
    pub fn checkout(&self) -> PooledBuffer<'_> {
        let entry = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(CachedBuffer::new);
        PooledBuffer { pool: self, entry }
    }

    /// Number of entries currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn checkin(&self, mut entry: CachedBuffer) {
        // Never keep a reference to bytes handed out to a caller.
        entry.buf = Vec::new();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(entry);
        }
    }
}

/// Scoped checkout of a [`CachedBuffer`]; returns it to the pool on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    entry: CachedBuffer,
}

impl Deref for PooledBuffer<'_> {
    type Target = CachedBuffer;

    fn deref(&self) -> &CachedBuffer {
        &self.entry
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut CachedBuffer {
        &mut self.entry
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        // CachedBuffer::new does not allocate.
        let entry = std::mem::replace(&mut self.entry, CachedBuffer::new());
        self.pool.checkin(entry);
    }
}
