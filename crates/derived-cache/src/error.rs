//! Error types for the derived-value cache
//!
//! None of these reach callers of `get`/`set`/`delete`/`clear`; the manager
//! logs them and degrades to memory-only behaviour. They surface from the
//! backing store, codec and key derivation seams.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by cache collaborators
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store rejected or failed an operation
    #[error("Store error: {0}")]
    Store(String),

    /// IO error from a file-backed store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Value codec failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Backing store call exceeded its time bound
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Input could not be reduced to a cache key
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Persisted payload is not a valid envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Persistence writer task is no longer running
    #[error("Persistence writer closed")]
    WriterClosed,
}

/// Result type for cache collaborators
pub type Result<T> = std::result::Result<T, CacheError>;
