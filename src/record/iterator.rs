//! Record Iterator
//!
//! Sequential walk over records starting at a position.
//!
//! The iterator re-reads the end probe before every step, so it can follow a
//! stream that keeps growing. It stops on the first of:
//! - an empty header slot or the probe end (`EndOfData`)
//! - bytes that do not parse or fail the codec check (`Corrupt`)
//!
//! After `Corrupt`, `is_last_entry_in_range()` tells a torn tail write (the
//! broken record is followed only by never-written space) from corruption in
//! the middle of the stream.

use std::marker::PhantomData;

use crate::addressing::Position;
use crate::error::{BlockWalError, Result};

use super::{HeaderProbe, PositionSource, Record, RecordCodec, RecordHeader};

/// One iteration step
#[derive(Debug)]
pub enum IterStep<H> {
    Record(Record<H>),
    EndOfData,
    Corrupt { position: Position, reason: String },
}

/// Where the last corrupt record sat, and what is known about its length
#[derive(Debug, Clone, Copy)]
struct CorruptAt {
    position: Position,
    /// Position right after the broken record, if its header was readable
    claimed_end: Option<Position>,
}

/// Iterator over records of codec `C` read from `S`
pub struct RecordIterator<'a, C: RecordCodec, S: PositionSource + ?Sized> {
    source: &'a S,
    /// Next position to parse
    cursor: Position,
    /// Readable end, re-evaluated on every step
    end_probe: Box<dyn Fn() -> Position + 'a>,
    corrupt: Option<CorruptAt>,
    finished: bool,
    _codec: PhantomData<C>,
}

impl<'a, C: RecordCodec, S: PositionSource + ?Sized> RecordIterator<'a, C, S> {
    /// Create an iterator starting at `start`
    pub fn new(
        start: Position,
        source: &'a S,
        end_probe: impl Fn() -> Position + 'a,
    ) -> Self {
        Self {
            source,
            cursor: start,
            end_probe: Box::new(end_probe),
            corrupt: None,
            finished: false,
            _codec: PhantomData,
        }
    }

    /// Restart the walk at `start`
    pub fn reset(&mut self, start: Position) {
        self.cursor = start;
        self.corrupt = None;
        self.finished = false;
    }

    /// Next position the iterator would parse
    pub fn cursor(&self) -> Position {
        self.cursor
    }

    /// Parse the next record
    ///
    /// I/O errors are returned as `Err`; structural problems as `Corrupt`.
    pub fn next_record(&mut self) -> Result<IterStep<C::Header>> {
        let end = (self.end_probe)();
        let header_len = C::HEADER_LEN as u64;

        if self.cursor >= end {
            return Ok(IterStep::EndOfData);
        }

        // Fewer bytes than a header left before the end
        let available = end.distance_from(self.cursor);
        if available < header_len {
            let rest = self.source.read_range(self.cursor, available)?;
            if rest.iter().all(|&b| b == 0) {
                return Ok(IterStep::EndOfData);
            }
            return Ok(self.corrupt_step(None, "partial record header before end of range"));
        }

        let header_bytes = self.source.read_range(self.cursor, header_len)?;
        let header = match C::decode_header(&header_bytes) {
            HeaderProbe::Empty => return Ok(IterStep::EndOfData),
            HeaderProbe::Invalid(reason) => return Ok(self.corrupt_step(None, &reason)),
            HeaderProbe::Valid(header) => header,
        };

        if header.header_length() != header_len {
            return Err(BlockWalError::UnexpectedState(format!(
                "unexpected scan state: header at {} claims {} header bytes, codec uses {}",
                self.cursor,
                header.header_length(),
                header_len
            )));
        }

        let claimed_end = Position(self.cursor.0.saturating_add(header.total_length()));
        if claimed_end > end {
            return Ok(self.corrupt_step(Some(claimed_end), "record runs past end of range"));
        }

        let data = self
            .source
            .read_range(Position(self.cursor.0 + header_len), header.data_length())?;
        if let Err(e) = C::verify(&header, self.cursor, &data) {
            return Ok(self.corrupt_step(Some(claimed_end), &e.to_string()));
        }

        let record = Record {
            position: self.cursor,
            header,
            data,
        };
        self.cursor = claimed_end;
        Ok(IterStep::Record(record))
    }

    fn corrupt_step(&mut self, claimed_end: Option<Position>, reason: &str) -> IterStep<C::Header> {
        self.corrupt = Some(CorruptAt {
            position: self.cursor,
            claimed_end,
        });
        IterStep::Corrupt {
            position: self.cursor,
            reason: reason.to_string(),
        }
    }

    /// Whether the last `Corrupt` step is the final thing in the range
    ///
    /// True when nothing but never-written space follows the broken record.
    /// Returns false if the iterator has not reported corruption.
    pub fn is_last_entry_in_range(&self) -> Result<bool> {
        let corrupt = match self.corrupt {
            Some(c) => c,
            None => return Ok(false),
        };

        let end = (self.end_probe)();
        let header_len = C::HEADER_LEN as u64;
        // Without a readable header the payload length is unknown; look right
        // after the header slot.
        let next = corrupt
            .claimed_end
            .unwrap_or(Position(corrupt.position.0.saturating_add(header_len)));

        if next >= end {
            return Ok(true);
        }

        let probe_len = end.distance_from(next).min(header_len);
        let bytes = self.source.read_range(next, probe_len)?;
        if probe_len < header_len {
            return Ok(bytes.iter().all(|&b| b == 0));
        }
        Ok(matches!(C::decode_header(&bytes), HeaderProbe::Empty))
    }

    /// Adapt into a plain `Iterator` that turns corruption into `InvalidData`
    pub fn into_records(self) -> Records<'a, C, S> {
        Records { inner: self }
    }
}

/// `Iterator` view over a `RecordIterator`
pub struct Records<'a, C: RecordCodec, S: PositionSource + ?Sized> {
    inner: RecordIterator<'a, C, S>,
}

impl<'a, C: RecordCodec, S: PositionSource + ?Sized> Iterator for Records<'a, C, S> {
    type Item = Result<Record<C::Header>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.inner.finished {
            return None;
        }

        match self.inner.next_record() {
            Ok(IterStep::Record(record)) => Some(Ok(record)),
            Ok(IterStep::EndOfData) => {
                self.inner.finished = true;
                None
            }
            Ok(IterStep::Corrupt { position, reason }) => {
                self.inner.finished = true;
                Some(Err(BlockWalError::InvalidData(format!(
                    "record at {}: {}",
                    position, reason
                ))))
            }
            Err(e) => {
                self.inner.finished = true;
                Some(Err(e))
            }
        }
    }
}
