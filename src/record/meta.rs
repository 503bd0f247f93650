//! Meta frames
//!
//! Meta streams hold small manifest records. Each one frames itself:
//! ```text
//! ┌──────────┬──────────┬──────────────────┐
//! │ Len (4)  │ CRC (4)  │ Payload (Len)    │
//! └──────────┴──────────┴──────────────────┘
//! ```
//! A zero length prefix marks never-written space.

use bytes::{Buf, BufMut, Bytes};

use crate::addressing::Position;
use crate::error::{BlockWalError, Result};

use super::PositionSource;

/// Length prefix + checksum
pub const META_FRAME_HEADER_SIZE: usize = 8;

/// Frame a meta payload
pub fn encode_meta_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(BlockWalError::InvalidArgument(
            "meta payload must not be empty".to_string(),
        ));
    }
    let len = u32::try_from(payload.len()).map_err(|_| {
        BlockWalError::InvalidArgument(format!("meta payload too large: {} bytes", payload.len()))
    })?;

    let mut frame = Vec::with_capacity(META_FRAME_HEADER_SIZE + payload.len());
    frame.put_u32_le(len);
    frame.put_u32_le(crc32fast::hash(payload));
    frame.put_slice(payload);
    Ok(frame)
}

/// Result of walking meta frames
#[derive(Debug, Clone)]
pub struct MetaScan {
    /// Last intact frame: its position and payload
    pub last: Option<(Position, Bytes)>,
    /// Position right after the last intact frame
    pub end: Position,
    /// False when the walk stopped on a torn final frame
    pub clean_end: bool,
}

/// Walk meta frames in `[start, end)`
///
/// A broken frame is accepted as a torn tail only if never-written space
/// follows it; anything else is `InvalidData`.
pub fn scan_meta_frames<S: PositionSource + ?Sized>(
    source: &S,
    start: Position,
    end: Position,
) -> Result<MetaScan> {
    let frame_header = META_FRAME_HEADER_SIZE as u64;
    let mut cursor = start;
    let mut last = None;

    let torn = |cursor: Position, last: Option<(Position, Bytes)>| -> Result<MetaScan> {
        tracing::warn!(position = cursor.0, "torn meta frame at end of stream");
        Ok(MetaScan {
            last,
            end: cursor,
            clean_end: false,
        })
    };

    loop {
        let available = end.distance_from(cursor);
        if available == 0 {
            break;
        }
        if available < frame_header {
            let rest = source.read_range(cursor, available)?;
            if rest.iter().all(|&b| b == 0) {
                break;
            }
            return torn(cursor, last);
        }

        let mut head = source.read_range(cursor, frame_header)?;
        let len = head.get_u32_le() as u64;
        let crc = head.get_u32_le();
        if len == 0 {
            if crc == 0 {
                break;
            }
            return Err(BlockWalError::InvalidData(format!(
                "meta frame at {} has zero length",
                cursor
            )));
        }

        let frame_end = Position(cursor.0 + frame_header + len);
        if frame_end > end {
            return torn(cursor, last);
        }

        let payload = source.read_range(Position(cursor.0 + frame_header), len)?;
        if crc32fast::hash(&payload) != crc {
            if is_unwritten(source, frame_end, end)? {
                return torn(cursor, last);
            }
            return Err(BlockWalError::InvalidData(format!(
                "meta frame at {} fails its checksum",
                cursor
            )));
        }

        last = Some((cursor, payload));
        cursor = frame_end;
    }

    Ok(MetaScan {
        last,
        end: cursor,
        clean_end: true,
    })
}

fn is_unwritten<S: PositionSource + ?Sized>(
    source: &S,
    position: Position,
    end: Position,
) -> Result<bool> {
    let len = end.distance_from(position).min(META_FRAME_HEADER_SIZE as u64);
    if len == 0 {
        return Ok(true);
    }
    let bytes = source.read_range(position, len)?;
    Ok(bytes.iter().all(|&b| b == 0))
}
