//! Configuration for blockwal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::addressing::{Position, StreamId};
use crate::block::BLOCK_HEADER_SIZE;
use crate::error::{BlockWalError, Result};

/// Default logical block size: 64 MB of record bytes per block
pub const DEFAULT_LOGICAL_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Main configuration for one storage engine instance (one logical stream)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the stream's block files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── block_00000000000000000000.blk
    ///     ├── block_00000000000000000001.blk
    ///     └── pool/        (pre-allocated spare extents)
    pub data_dir: PathBuf,

    /// Identifier of the owning stream, stamped into every block header
    pub stream_id: StreamId,

    /// Whether this engine stores log records or meta records
    pub stream_kind: StreamKind,

    /// Record bytes per block (the physical file adds one header)
    pub logical_block_size: u64,

    /// Position of the first byte of the stream
    pub base_position: Position,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active block
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Number of spare extents the filesystem pool keeps reserved
    pub pool_capacity: usize,
}

/// Kind of stream an engine instance serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Generic log records, recovered through a record codec
    Log,

    /// Self-framing manifest records written with `append_meta`
    Meta,
}

/// Block sync strategy
#[derive(Debug, Clone, Copy)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N appends (balanced durability/performance)
    EveryNAppends { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blockwal_data"),
            stream_id: StreamId(1),
            stream_kind: StreamKind::Log,
            logical_block_size: DEFAULT_LOGICAL_BLOCK_SIZE,
            base_position: Position(0),
            sync_strategy: SyncStrategy::EveryNAppends { count: 64 },
            pool_capacity: 2,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Physical size of one block file (header + record bytes)
    pub fn physical_block_size(&self) -> u64 {
        BLOCK_HEADER_SIZE as u64 + self.logical_block_size
    }

    /// Check the config before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.logical_block_size == 0 || self.logical_block_size % BLOCK_HEADER_SIZE as u64 != 0
        {
            return Err(BlockWalError::InvalidArgument(format!(
                "logical block size {} must be a non-zero multiple of {}",
                self.logical_block_size, BLOCK_HEADER_SIZE
            )));
        }
        if !self.stream_id.is_valid() {
            return Err(BlockWalError::InvalidArgument(format!(
                "invalid stream id {}",
                self.stream_id
            )));
        }
        if !self.base_position.is_valid() {
            return Err(BlockWalError::InvalidArgument(
                "base position must be a valid position".to_string(),
            ));
        }
        if let SyncStrategy::EveryNAppends { count: 0 } = self.sync_strategy {
            return Err(BlockWalError::InvalidArgument(
                "sync interval must be at least one append".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the block directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the owning stream id
    pub fn stream_id(mut self, id: u64) -> Self {
        self.config.stream_id = StreamId(id);
        self
    }

    /// Set the stream kind (log or meta)
    pub fn stream_kind(mut self, kind: StreamKind) -> Self {
        self.config.stream_kind = kind;
        self
    }

    /// Set the logical block size (in bytes)
    pub fn logical_block_size(mut self, size: u64) -> Self {
        self.config.logical_block_size = size;
        self
    }

    /// Set the base position of the stream
    pub fn base_position(mut self, position: u64) -> Self {
        self.config.base_position = Position(position);
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the number of spare extents kept by the filesystem pool
    pub fn pool_capacity(mut self, count: usize) -> Self {
        self.config.pool_capacity = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
