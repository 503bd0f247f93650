//! Record Module
//!
//! The storage engine never interprets record bytes on the hot path. Recovery
//! and codec-aware reads go through the `RecordCodec` seam defined here.
//!
//! ## Responsibilities
//! - `RecordCodec` / `RecordHeader`: what a record format must tell the engine
//! - `RecordIterator`: lazy walk over a position range, separating
//!   "ran out of data" from "found broken bytes"
//! - `LogEntryCodec`: the bundled record format
//! - Meta frames: self-framing manifest records for meta streams

mod entry;
mod iterator;
mod meta;

use std::fmt::Debug;

use bytes::Bytes;

use crate::addressing::Position;
use crate::error::Result;

pub use entry::{LogEntryCodec, LogEntryHeader, ENTRY_HEADER_SIZE};
pub use iterator::{IterStep, RecordIterator, Records};
pub use meta::{encode_meta_frame, scan_meta_frames, MetaScan, META_FRAME_HEADER_SIZE};

/// Header of one parsed record
pub trait RecordHeader: Clone + Debug + Send {
    /// Timestamp carried by the record
    fn timestamp(&self) -> i64;

    /// Payload bytes following the header
    fn data_length(&self) -> u64;

    /// Bytes taken by the header itself
    fn header_length(&self) -> u64;

    /// Header plus payload
    fn total_length(&self) -> u64 {
        self.header_length() + self.data_length()
    }
}

/// Outcome of decoding a header slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderProbe<H> {
    /// A structurally valid header
    Valid(H),
    /// Never-written space (end of data)
    Empty,
    /// Bytes are present but are not a header
    Invalid(String),
}

/// A record wire format the engine can walk during recovery
pub trait RecordCodec {
    type Header: RecordHeader;

    /// Fixed size of an encoded header
    const HEADER_LEN: usize;

    /// Decode the header slot at the start of `bytes` (exactly `HEADER_LEN` long)
    fn decode_header(bytes: &[u8]) -> HeaderProbe<Self::Header>;

    /// Check a payload against its header; `InvalidData` on mismatch
    fn verify(header: &Self::Header, position: Position, data: &[u8]) -> Result<()>;
}

/// Anything that can serve bytes by stream position
pub trait PositionSource {
    fn read_range(&self, position: Position, len: u64) -> Result<Bytes>;
}

/// One parsed record
#[derive(Debug, Clone)]
pub struct Record<H> {
    /// Position of the record's first header byte
    pub position: Position,
    pub header: H,
    /// Payload bytes
    pub data: Bytes,
}

impl<H: RecordHeader> Record<H> {
    /// Position just past this record
    pub fn end_position(&self) -> Position {
        Position(self.position.0 + self.header.total_length())
    }
}
