//! Addressing
//!
//! Typed positions and block ids, plus the one place where a global stream
//! position is turned into a block and an offset inside that block.
//!
//! ## Layout
//! ```text
//!  position:  0            L            2L           3L
//!             ├────────────┼────────────┼────────────┤
//!  block:     │  block 0   │  block 1   │  block 2   │
//!
//!  block file: ┌────────────────┬──────────────────────────┐
//!              │ header (4 KB)  │ L record bytes           │
//!              └────────────────┴──────────────────────────┘
//! ```
//! Positions never address header bytes.

use std::fmt;

use crate::block::BLOCK_HEADER_SIZE;
use crate::error::{BlockWalError, Result};

// =============================================================================
// Position
// =============================================================================

/// Byte offset in the logical record stream (the LSN)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position(pub u64);

impl Position {
    /// "No position" sentinel
    pub const INVALID: Position = Position(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Advance by `len` bytes, failing instead of wrapping
    pub fn checked_add(self, len: u64) -> Result<Position> {
        match self.0.checked_add(len) {
            Some(p) if p != u64::MAX => Ok(Position(p)),
            _ => Err(BlockWalError::InvalidArgument(format!(
                "position {} + {} overflows",
                self.0, len
            ))),
        }
    }

    /// Distance from `earlier` to `self` (saturating at zero)
    pub fn distance_from(self, earlier: Position) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "INVALID")
        }
    }
}

// =============================================================================
// BlockId
// =============================================================================

/// Identifier of one physical block file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId(pub u64);

impl BlockId {
    /// "No block" sentinel
    pub const INVALID: BlockId = BlockId(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn next(self) -> BlockId {
        BlockId(self.0 + 1)
    }

    /// Previous block id, or None below block 0
    pub fn prev(self) -> Option<BlockId> {
        self.0.checked_sub(1).map(BlockId)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// StreamId
// =============================================================================

/// Identifier of the stream owning a set of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl StreamId {
    pub const INVALID: StreamId = StreamId(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Block Layout
// =============================================================================

/// A contiguous piece of a position range that lives in a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Block holding the bytes
    pub block_id: BlockId,
    /// First position covered by this span
    pub position: Position,
    /// Physical offset inside the block file (header already skipped)
    pub physical_offset: u64,
    /// Number of bytes
    pub len: u64,
}

/// Fixed-size block geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    logical_block_size: u64,
}

impl BlockLayout {
    pub fn new(logical_block_size: u64) -> Result<Self> {
        if logical_block_size == 0 {
            return Err(BlockWalError::InvalidArgument(
                "logical block size must be non-zero".to_string(),
            ));
        }
        Ok(Self { logical_block_size })
    }

    /// Record bytes per block
    pub fn logical_block_size(&self) -> u64 {
        self.logical_block_size
    }

    /// Size of a block file on disk
    pub fn physical_block_size(&self) -> u64 {
        BLOCK_HEADER_SIZE as u64 + self.logical_block_size
    }

    /// Block containing `position`
    pub fn block_of(&self, position: Position) -> BlockId {
        BlockId(position.0 / self.logical_block_size)
    }

    /// Offset of `position` inside its block's record region
    pub fn offset_in_block(&self, position: Position) -> u64 {
        position.0 % self.logical_block_size
    }

    /// First position stored in `block_id`
    pub fn block_start(&self, block_id: BlockId) -> Position {
        Position(block_id.0 * self.logical_block_size)
    }

    /// Position just past the last byte stored in `block_id`
    pub fn block_end(&self, block_id: BlockId) -> Position {
        Position((block_id.0 + 1) * self.logical_block_size)
    }

    /// Bytes left in the block of `position`, counting `position` itself
    pub fn remaining_in_block(&self, position: Position) -> u64 {
        self.logical_block_size - self.offset_in_block(position)
    }

    /// Whether `position` sits on a block boundary
    pub fn is_block_aligned(&self, position: Position) -> bool {
        self.offset_in_block(position) == 0
    }

    /// Physical location of `position`: its block and the file offset
    pub fn locate(&self, position: Position) -> (BlockId, u64) {
        (
            self.block_of(position),
            BLOCK_HEADER_SIZE as u64 + self.offset_in_block(position),
        )
    }

    /// Split `[position, position + len)` at block boundaries
    pub fn split(&self, position: Position, len: u64) -> Vec<BlockSpan> {
        let mut spans = Vec::new();
        let mut cursor = position;
        let mut remaining = len;

        while remaining > 0 {
            let (block_id, physical_offset) = self.locate(cursor);
            let take = remaining.min(self.remaining_in_block(cursor));
            spans.push(BlockSpan {
                block_id,
                position: cursor,
                physical_offset,
                len: take,
            });
            cursor = Position(cursor.0 + take);
            remaining -= take;
        }

        spans
    }
}
