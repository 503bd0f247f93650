//! Log Entry codec
//!
//! The bundled record format.
//!
//! ## Format
//! ```text
//! ┌───────────┬─────────────┬─────────────┬────────────┬──────────────┬──────────┬────────────┬─────────┐
//! │ Magic (2) │ Version (2) │ DataLen (4) │ Tstamp (8) │ Position (8) │ DCRC (4) │ HCRC (4)   │ Data    │
//! └───────────┴─────────────┴─────────────┴────────────┴──────────────┴──────────┴────────────┴─────────┘
//! ```
//! All integers little endian. HCRC covers the first 28 header bytes.
//! The stamped position must equal the position the record is read from.

use bytes::{Buf, BufMut};

use crate::addressing::Position;
use crate::error::{BlockWalError, Result};

use super::{HeaderProbe, RecordCodec, RecordHeader};

/// Header size: 2 + 2 + 4 + 8 + 8 + 4 + 4 = 32 bytes
pub const ENTRY_HEADER_SIZE: usize = 32;

/// Magic bytes identifying a log entry ("LE")
const ENTRY_MAGIC: u16 = 0x4C45;

/// Current entry format version
const ENTRY_VERSION: u16 = 1;

/// Decoded log entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntryHeader {
    pub data_len: u32,
    pub timestamp: i64,
    /// Position the entry was written at
    pub position: u64,
    pub data_crc: u32,
}

impl RecordHeader for LogEntryHeader {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn data_length(&self) -> u64 {
        self.data_len as u64
    }

    fn header_length(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64
    }
}

/// Codec for `LogEntryHeader`-framed records
pub struct LogEntryCodec;

impl LogEntryCodec {
    /// Encode one entry destined for `position`
    pub fn encode(position: Position, timestamp: i64, data: &[u8]) -> Result<Vec<u8>> {
        let data_len = u32::try_from(data.len()).map_err(|_| {
            BlockWalError::InvalidArgument(format!("entry payload too large: {} bytes", data.len()))
        })?;

        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + data.len());
        buf.put_u16_le(ENTRY_MAGIC);
        buf.put_u16_le(ENTRY_VERSION);
        buf.put_u32_le(data_len);
        buf.put_i64_le(timestamp);
        buf.put_u64_le(position.0);
        buf.put_u32_le(crc32fast::hash(data));
        let header_crc = crc32fast::hash(&buf);
        buf.put_u32_le(header_crc);
        buf.put_slice(data);

        Ok(buf)
    }

    /// Encoded size of an entry with `data_len` payload bytes
    pub fn encoded_len(data_len: usize) -> usize {
        ENTRY_HEADER_SIZE + data_len
    }
}

impl RecordCodec for LogEntryCodec {
    type Header = LogEntryHeader;

    const HEADER_LEN: usize = ENTRY_HEADER_SIZE;

    fn decode_header(bytes: &[u8]) -> HeaderProbe<LogEntryHeader> {
        if bytes.len() < ENTRY_HEADER_SIZE {
            return HeaderProbe::Invalid(format!("header slot too short: {} bytes", bytes.len()));
        }
        let bytes = &bytes[..ENTRY_HEADER_SIZE];
        if bytes.iter().all(|&b| b == 0) {
            return HeaderProbe::Empty;
        }

        let stored_crc = (&bytes[28..32]).get_u32_le();
        let actual_crc = crc32fast::hash(&bytes[..28]);

        let mut buf = bytes;
        let magic = buf.get_u16_le();
        if magic != ENTRY_MAGIC {
            return HeaderProbe::Invalid(format!("invalid entry magic: {:#06x}", magic));
        }
        let version = buf.get_u16_le();
        if version != ENTRY_VERSION {
            return HeaderProbe::Invalid(format!("unsupported entry version: {}", version));
        }
        if stored_crc != actual_crc {
            return HeaderProbe::Invalid("entry header checksum mismatch".to_string());
        }

        HeaderProbe::Valid(LogEntryHeader {
            data_len: buf.get_u32_le(),
            timestamp: buf.get_i64_le(),
            position: buf.get_u64_le(),
            data_crc: buf.get_u32_le(),
        })
    }

    fn verify(header: &LogEntryHeader, position: Position, data: &[u8]) -> Result<()> {
        if header.position != position.0 {
            return Err(BlockWalError::InvalidData(format!(
                "entry stamped for position {} found at {}",
                header.position, position
            )));
        }
        if data.len() as u64 != header.data_length() {
            return Err(BlockWalError::InvalidData(format!(
                "entry payload is {} bytes, header says {}",
                data.len(),
                header.data_len
            )));
        }
        if crc32fast::hash(data) != header.data_crc {
            return Err(BlockWalError::InvalidData(
                "entry payload checksum mismatch".to_string(),
            ));
        }
        Ok(())
    }
}
