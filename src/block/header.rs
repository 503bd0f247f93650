//! Block Header
//!
//! Fixed-size metadata stored at physical offset 0 of every block.
//!
//! ## Encoding
//! ```text
//! ┌───────────┬─────────────┬───────────┬────────────┬───────────┬──────────┬──────────┬─────────┬─────────┐
//! │ Magic (4) │ Version (2) │ Flags (2) │ Stream (8) │ Block (8) │ MinPos(8)│ MinTs(8) │ CRC (4) │ zeros.. │
//! └───────────┴─────────────┴───────────┴────────────┴───────────┴──────────┴──────────┴─────────┴─────────┘
//!  <──────────────────────── bincode (fixint, LE) ────────────────────────────────────>
//!  <──────────────────────────────────── BLOCK_HEADER_SIZE bytes ──────────────────────────────────────────>
//! ```
//! An all-zero region means the block has no header yet.

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::addressing::{BlockId, Position, StreamId};
use crate::error::{BlockWalError, Result};

use super::BLOCK_HEADER_SIZE;

/// Magic bytes identifying a block header ("BLKH")
pub(crate) const MAGIC: u32 = 0x424C_4B48;

/// Current block header format version
pub(crate) const VERSION: u16 = 1;

/// Encoded field bytes: 4 + 2 + 2 + 8 + 8 + 8 + 8
pub(crate) const ENCODED_FIELDS_SIZE: usize = 40;

/// Header flag: the block belongs to a meta stream
pub const FLAG_META: u16 = 0x1;

/// Self-describing block metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    magic: u32,
    version: u16,
    pub flags: u16,
    /// Owning stream
    pub stream_id: u64,
    /// This block
    pub block_id: u64,
    /// Position of the first record starting in this block
    pub min_position: u64,
    /// Timestamp of that record
    pub min_timestamp: i64,
}

impl BlockHeader {
    pub fn new(
        stream_id: StreamId,
        block_id: BlockId,
        min_position: Position,
        min_timestamp: i64,
        flags: u16,
    ) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            stream_id: stream_id.0,
            block_id: block_id.0,
            min_position: min_position.0,
            min_timestamp,
        }
    }

    pub fn block_id(&self) -> BlockId {
        BlockId(self.block_id)
    }

    pub fn stream_id(&self) -> StreamId {
        StreamId(self.stream_id)
    }

    pub fn min_position(&self) -> Position {
        Position(self.min_position)
    }

    pub fn is_meta(&self) -> bool {
        self.flags & FLAG_META != 0
    }

    /// Encode into a full, zero-padded header region
    pub fn encode(&self) -> Result<Vec<u8>> {
        let fields = bincode::serialize(self)?;
        debug_assert_eq!(fields.len(), ENCODED_FIELDS_SIZE);

        let mut region = vec![0u8; BLOCK_HEADER_SIZE];
        region[..ENCODED_FIELDS_SIZE].copy_from_slice(&fields);
        let crc = crc32fast::hash(&fields);
        region[ENCODED_FIELDS_SIZE..ENCODED_FIELDS_SIZE + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(region)
    }

    /// Decode a header region
    ///
    /// Returns:
    /// - `Ok(None)`: region is all zeros (no header written)
    /// - `Ok(Some(header))`: valid header
    /// - `Err(InvalidData)`: bad magic, version, or checksum
    pub fn decode(region: &[u8]) -> Result<Option<Self>> {
        if region.len() < ENCODED_FIELDS_SIZE + 4 {
            return Err(BlockWalError::InvalidData(format!(
                "block header region too short: {} bytes",
                region.len()
            )));
        }
        if region.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let fields = &region[..ENCODED_FIELDS_SIZE];
        let stored_crc = (&region[ENCODED_FIELDS_SIZE..]).get_u32_le();
        let actual_crc = crc32fast::hash(fields);
        if stored_crc != actual_crc {
            return Err(BlockWalError::InvalidData(format!(
                "block header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let header: BlockHeader = bincode::deserialize(fields)?;
        if header.magic != MAGIC {
            return Err(BlockWalError::InvalidData(format!(
                "invalid block header magic: {:#010x}",
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(BlockWalError::InvalidData(format!(
                "unsupported block header version: {}",
                header.version
            )));
        }

        Ok(Some(header))
    }
}
