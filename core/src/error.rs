//! Error types for TIDEMARK

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Main error type for the store and protocol facade
#[derive(Error, Debug)]
pub enum StoreError {
    // ============ Query Errors ============
    #[error("Malformed query payload: {0}")]
    Encoding(String),

    #[error("Unexpected query path: {0}")]
    UnknownRequest(String),

    // ============ State Errors ============
    #[error("Version {0} does not exist or has been pruned")]
    VersionNotFound(u64),

    #[error("Commit height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Internal(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A failure the node must not survive.
///
/// Returned by the commit path when the durable store may be inconsistent.
/// The top-level driver must treat this as a halt signal: continuing to
/// serve blocks on top of a possibly-corrupt store silently forks the node
/// away from the rest of the network.
#[derive(Error, Debug)]
#[error("unrecoverable store failure: {0}")]
pub struct Unrecoverable(#[from] pub StoreError);

impl Unrecoverable {
    /// The underlying store error.
    pub fn cause(&self) -> &StoreError {
        &self.0
    }
}
