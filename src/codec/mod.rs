//! Message codec on the hot path of every frame.
//!
//! [`Codec`] turns typed messages into payload bytes and back using
//! `serde_json`. Marshaling goes through a [`BufferPool`] checkout so each
//! call allocates once, at the size the previous output needed.
//!
//! Unmarshaling never checks out a pool buffer. It reads straight from the
//! borrowed input slice: the deserializer is the cursor attached to the
//! caller's bytes, so there is no scratch storage to reuse and no copy to
//! avoid. The pool therefore serves the marshal side only.

// Rust guideline compliant 2026-02

pub mod pool;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pool::{BufferPool, PooledBuffer};

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),
    /// The payload does not match the expected type.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}

/// JSON codec with pooled marshal buffers.
///
/// Shared freely between tasks; the pool synchronizes internally and a
/// buffer never outlives the call that checked it out.
#[derive(Debug, Default)]
pub struct Codec {
    pool: BufferPool,
}

impl Codec {
    /// Create a codec with a default-sized pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec over an explicit pool.
    pub fn with_pool(pool: BufferPool) -> Self {
        Self { pool }
    }

    /// Codec name, for logs and diagnostics.
    pub fn name(&self) -> &'static str {
        "json"
    }

    /// Pool backing the marshal path.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Serialize `message` into a freshly detached byte payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails. The scratch
    /// buffer is returned to the pool either way.
    pub fn marshal<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes, CodecError> {
        let mut scratch = self.pool.checkout();
        serde_json::to_writer(scratch.prepare(), message).map_err(CodecError::Encode)?;
        Ok(Bytes::from(scratch.detach()))
    }

    /// Decode `data` into a new value of type `T`.
    ///
    /// Borrows `data` directly; the pool is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `data` is not a complete encoding of `T`.
    pub fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        let mut de = serde_json::Deserializer::from_slice(data);
        let value = T::deserialize(&mut de).map_err(CodecError::Decode)?;
        de.end().map_err(CodecError::Decode)?;
        Ok(value)
    }

    /// Decode `data` into an existing value, replacing its contents.
    ///
    /// On error `target` may hold a partially decoded value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `data` is not a complete encoding of `T`.
    pub fn unmarshal_into<'de, T: Deserialize<'de>>(
        &self,
        data: &'de [u8],
        target: &mut T,
    ) -> Result<(), CodecError> {
        let mut de = serde_json::Deserializer::from_slice(data);
        T::deserialize_in_place(&mut de, target).map_err(CodecError::Decode)?;
        de.end().map_err(CodecError::Decode)
    }
}
