//! Error types for blockwal
//!
//! Provides a unified error type for all storage engine operations.

use thiserror::Error;

/// Result type alias using BlockWalError
pub type Result<T> = std::result::Result<T, BlockWalError>;

/// Unified error type for blockwal operations
#[derive(Debug, Error)]
pub enum BlockWalError {
    // -------------------------------------------------------------------------
    // Argument / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage already initialized")]
    AlreadyInitialized,

    #[error("Storage not initialized")]
    NotInitialized,

    // -------------------------------------------------------------------------
    // Bounds Errors
    // -------------------------------------------------------------------------
    /// The requested position or block has already been reclaimed
    #[error("Requested {requested} is below the lower bound {begin}")]
    OutOfLowerBound { requested: u64, begin: u64 },

    /// The requested position or block lies beyond what may be read or removed
    #[error("Requested {requested} is beyond the upper bound {end}")]
    OutOfUpperBound { requested: u64, end: u64 },

    // -------------------------------------------------------------------------
    // On-disk State Errors
    // -------------------------------------------------------------------------
    #[error("Unexpected on-disk state: {0}")]
    UnexpectedState(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("Block allocation failed: {0}")]
    AllocationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BlockWalError {
    /// Whether the error means the on-disk log needs operator attention.
    ///
    /// Bounds and argument errors are ordinary caller mistakes; everything
    /// touching the persisted state is not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BlockWalError::UnexpectedState(_) | BlockWalError::InvalidData(_) | BlockWalError::Io(_)
        )
    }
}

impl From<bincode::Error> for BlockWalError {
    fn from(e: bincode::Error) -> Self {
        BlockWalError::Serialization(e.to_string())
    }
}
