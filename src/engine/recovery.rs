//! Recovery
//!
//! Rebuilds the in-memory state of a stream from its block files.
//!
//! ## Backward Scan
//! ```text
//!   min                          max
//!   ┌──────┬──────┬──────┬──────┬──────┐
//!   │ full │ full │ hdr  │ cont │ cont │   ← scan starts at max, walks down
//!   └──────┴──────┴──┬───┴──────┴──────┘
//!                    └─ first block with a header: walk its records from
//!                       header.min_position until end of data or a torn tail
//! ```
//! Blocks without a header hold no record start (either never written or
//! continuation bytes of a record from a lower block), so the walk moves on to
//! the block below. The first block with a header decides the tail. If none of
//! its records is intact, the tail stays at its `min_position` and the last
//! record is taken from the block below, which must end exactly there.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::addressing::{BlockId, BlockLayout, Position};
use crate::block::{
    BlockHeader, BlockManager, BlockPool, BlockReader, FsBlockManager, FsBlockReader,
    NoSparePool,
};
use crate::config::{Config, StreamKind};
use crate::error::{BlockWalError, Result};
use crate::record::{scan_meta_frames, IterStep, PositionSource, RecordCodec, RecordIterator};

use super::{read_spans, BlockStorage, BlockSwitchObserver, NoopObserver};

/// Outcome of scanning the records of one block
struct BlockScan<T> {
    /// Position right after the last intact record
    end: Position,
    /// False when the scan stopped on a torn final record
    clean_end: bool,
    /// Last intact record, as the caller wants to see it
    last: Option<T>,
}

/// What a recovery would find, as reported by the dry-run scans
#[derive(Debug, Clone)]
pub struct TailScan<T> {
    /// `[min, max]` block ids on disk, None for an empty directory
    pub blocks: Option<(BlockId, BlockId)>,
    /// Position the next append would go to
    pub tail: Position,
    /// Last intact record
    pub last: Option<T>,
}

/// Unbounded reads straight from block files
///
/// The engine's own `read` enforces the tail, which is not known yet while
/// recovering.
struct RawSource<'a> {
    layout: &'a BlockLayout,
    reader: &'a dyn BlockReader,
}

impl PositionSource for RawSource<'_> {
    fn read_range(&self, position: Position, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        read_spans(self.layout, self.reader, position, len)
    }
}

impl BlockStorage {
    // =========================================================================
    // Log Streams
    // =========================================================================

    /// Reopen a log stream, walking records with codec `C`
    ///
    /// Returns the engine and the header and position of the last intact
    /// record, if any.
    pub fn load<C: RecordCodec>(
        config: Config,
        observer: impl BlockSwitchObserver + 'static,
        pool: Arc<dyn BlockPool>,
    ) -> Result<(Self, Option<(C::Header, Position)>)> {
        config.validate()?;
        let manager = FsBlockManager::open(&config.data_dir, config.physical_block_size())?;
        let reader = FsBlockReader::new(manager.dir());
        Self::load_with::<C>(config, observer, pool, Box::new(manager), Box::new(reader))
    }

    /// `load` with caller-supplied collaborators
    pub fn load_with<C: RecordCodec>(
        config: Config,
        observer: impl BlockSwitchObserver + 'static,
        pool: Arc<dyn BlockPool>,
        manager: Box<dyn BlockManager>,
        reader: Box<dyn BlockReader>,
    ) -> Result<(Self, Option<(C::Header, Position)>)> {
        let storage = Self::assemble(config, Box::new(observer), pool, manager, reader)?;
        storage.ensure_kind(StreamKind::Log, "load")?;

        let last = storage.recover(|storage, header, probe_end| {
            storage.scan_records::<C>(header.min_position(), probe_end)
        })?;
        Ok((storage, last))
    }

    // =========================================================================
    // Meta Streams
    // =========================================================================

    /// Reopen a meta stream; returns the payload of the last intact meta record
    pub fn load_meta(
        config: Config,
        observer: impl BlockSwitchObserver + 'static,
        pool: Arc<dyn BlockPool>,
    ) -> Result<(Self, Option<Bytes>)> {
        config.validate()?;
        let manager = FsBlockManager::open(&config.data_dir, config.physical_block_size())?;
        let reader = FsBlockReader::new(manager.dir());
        Self::load_meta_with(config, observer, pool, Box::new(manager), Box::new(reader))
    }

    /// `load_meta` with caller-supplied collaborators
    pub fn load_meta_with(
        config: Config,
        observer: impl BlockSwitchObserver + 'static,
        pool: Arc<dyn BlockPool>,
        manager: Box<dyn BlockManager>,
        reader: Box<dyn BlockReader>,
    ) -> Result<(Self, Option<Bytes>)> {
        let storage = Self::assemble(config, Box::new(observer), pool, manager, reader)?;
        storage.ensure_kind(StreamKind::Meta, "load_meta")?;

        let last = storage.recover(|storage, header, probe_end| {
            storage.scan_meta(header.min_position(), probe_end)
        })?;
        Ok((storage, last))
    }

    // =========================================================================
    // Dry Runs
    // =========================================================================

    /// Run the log stream backward scan without changing any file
    ///
    /// Reports the tail `load` would settle on. Torn records are not cut and
    /// no block is deleted.
    pub fn scan_tail<C: RecordCodec>(config: Config) -> Result<TailScan<(C::Header, Position)>> {
        let storage = Self::open_detached(config, StreamKind::Log, "scan_tail")?;
        let found = storage.find_tail(|storage, header, probe_end| {
            storage.scan_records::<C>(header.min_position(), probe_end)
        })?;
        Ok(storage.tail_scan(found))
    }

    /// `scan_tail` for a meta stream
    pub fn scan_meta_tail(config: Config) -> Result<TailScan<Bytes>> {
        let storage = Self::open_detached(config, StreamKind::Meta, "scan_meta_tail")?;
        let found = storage.find_tail(|storage, header, probe_end| {
            storage.scan_meta(header.min_position(), probe_end)
        })?;
        Ok(storage.tail_scan(found))
    }

    /// Engine over the on-disk blocks with no spare extents, for scanning only
    fn open_detached(config: Config, kind: StreamKind, op: &str) -> Result<Self> {
        config.validate()?;
        let manager = FsBlockManager::open(&config.data_dir, config.physical_block_size())?;
        let reader = FsBlockReader::new(manager.dir());
        let storage = Self::assemble(
            config,
            Box::new(NoopObserver),
            Arc::new(NoSparePool),
            Box::new(manager),
            Box::new(reader),
        )?;
        storage.ensure_kind(kind, op)?;
        Ok(storage)
    }

    fn tail_scan<T>(&self, found: Option<(Position, Option<T>)>) -> TailScan<T> {
        let (tail, last) = match found {
            Some(found) => found,
            None => (self.get_end_position(), None),
        };
        TailScan {
            blocks: self.get_block_id_range(),
            tail,
            last,
        }
    }

    // =========================================================================
    // Shared Recovery
    // =========================================================================

    /// Find the tail, then put the engine in a state to append at it
    fn recover<T>(
        &self,
        scan_block: impl Fn(&Self, &BlockHeader, Position) -> Result<BlockScan<T>>,
    ) -> Result<Option<T>> {
        let (tail, last) = match self.find_tail(scan_block)? {
            Some(found) => found,
            None => {
                info!(
                    stream_id = self.config.stream_id.0,
                    "no blocks on disk, starting empty stream"
                );
                return Ok(None);
            }
        };

        let mut writer = self.writer.lock();
        let mut blocks = self.blocks.write();
        let header = self.rewind_to(&mut writer, &mut blocks, tail)?;

        let mut state = self.tail.lock();
        state.tail = tail;
        state.header = header;
        drop(state);

        info!(
            stream_id = self.config.stream_id.0,
            min_block = blocks.min.0,
            max_block = ?blocks.max.map(|b| b.0),
            tail = tail.0,
            "recovered block storage"
        );
        Ok(last)
    }

    /// Adopt the on-disk block range and scan for the tail; None without blocks
    ///
    /// Reads only.
    fn find_tail<T>(
        &self,
        scan_block: impl Fn(&Self, &BlockHeader, Position) -> Result<BlockScan<T>>,
    ) -> Result<Option<(Position, Option<T>)>> {
        let (min, max) = match self.manager.get_block_id_range()? {
            Some(range) => range,
            None => return Ok(None),
        };

        {
            let mut blocks = self.blocks.write();
            blocks.min = min;
            blocks.max = Some(max);
        }

        let (tail, last) = self.scan_backward(min, max, scan_block)?;
        Ok(Some((tail.max(self.get_begin_position()), last)))
    }

    /// Walk blocks from `max` down to the first one holding an intact record
    ///
    /// A block whose header is intact but whose first record is torn fixes the
    /// tail at its `min_position`; the last record then comes from the block
    /// below, which must run exactly up to that tail.
    fn scan_backward<T>(
        &self,
        min: BlockId,
        max: BlockId,
        scan_block: impl Fn(&Self, &BlockHeader, Position) -> Result<BlockScan<T>>,
    ) -> Result<(Position, Option<T>)> {
        let probe_end = self.layout.block_end(max);
        let mut tail = probe_end;
        let mut pinned = false;
        let mut block_id = max;

        loop {
            match self.read_block_header(block_id)? {
                None if pinned => {
                    debug!(block_id = block_id.0, "continuation block below the tail");
                }
                None => {
                    debug!(block_id = block_id.0, "block holds no record start");
                    tail = self.layout.block_start(block_id);
                }
                Some(header) => {
                    self.check_header(&header, block_id)?;
                    let end = if pinned { tail } else { probe_end };
                    let scan = scan_block(self, &header, end)?;
                    debug!(
                        block_id = block_id.0,
                        from = header.min_position().0,
                        end = scan.end.0,
                        clean_end = scan.clean_end,
                        "scanned block"
                    );

                    if pinned {
                        if !scan.clean_end {
                            return Err(BlockWalError::InvalidData(format!(
                                "corrupt record at {} below a torn record at {}",
                                scan.end, tail
                            )));
                        }
                        if scan.end != tail {
                            return Err(BlockWalError::UnexpectedState(format!(
                                "block {} ends at {} but the next record start is {}",
                                block_id, scan.end, tail
                            )));
                        }
                        return Ok((tail, scan.last));
                    }

                    if block_id < max
                        && scan.clean_end
                        && scan.end < self.layout.block_end(block_id)
                    {
                        return Err(BlockWalError::UnexpectedState(format!(
                            "block {} ends at {} before its boundary while block {} exists",
                            block_id, scan.end, max
                        )));
                    }
                    if !scan.clean_end {
                        warn!(
                            block_id = block_id.0,
                            tail = scan.end.0,
                            "discarding torn record at end of stream"
                        );
                    }
                    if scan.last.is_some() {
                        return Ok((scan.end, scan.last));
                    }

                    // Nothing intact starts here; the last record lives below
                    tail = scan.end;
                    pinned = true;
                }
            }

            match block_id.prev() {
                Some(prev) if prev >= min => block_id = prev,
                _ => return Ok((tail, None)),
            }
        }
    }

    /// Walk records of codec `C` in `[start, probe_end)`
    fn scan_records<C: RecordCodec>(
        &self,
        start: Position,
        probe_end: Position,
    ) -> Result<BlockScan<(C::Header, Position)>> {
        let source = self.raw_source();
        let mut iter = RecordIterator::<C, _>::new(start, &source, move || probe_end);
        let mut last = None;
        let mut end = start;

        loop {
            match iter.next_record()? {
                IterStep::Record(record) => {
                    end = record.end_position();
                    last = Some((record.header, record.position));
                }
                IterStep::EndOfData => {
                    return Ok(BlockScan {
                        end,
                        clean_end: true,
                        last,
                    });
                }
                IterStep::Corrupt { position, reason } => {
                    if position != end {
                        return Err(BlockWalError::UnexpectedState(format!(
                            "unexpected scan state: corruption reported at {} while cursor is {}",
                            position, end
                        )));
                    }
                    if iter.is_last_entry_in_range()? {
                        debug!(position = position.0, reason = %reason, "torn record");
                        return Ok(BlockScan {
                            end,
                            clean_end: false,
                            last,
                        });
                    }
                    return Err(BlockWalError::InvalidData(format!(
                        "corrupt record at {} followed by more data: {}",
                        position, reason
                    )));
                }
            }
        }
    }

    /// Walk meta frames in `[start, probe_end)`
    fn scan_meta(&self, start: Position, probe_end: Position) -> Result<BlockScan<Bytes>> {
        let source = self.raw_source();
        let scan = scan_meta_frames(&source, start, probe_end)?;
        Ok(BlockScan {
            end: scan.end,
            clean_end: scan.clean_end,
            last: scan.last.map(|(_, payload)| payload),
        })
    }

    /// A header must describe this stream and this block
    fn check_header(&self, header: &BlockHeader, block_id: BlockId) -> Result<()> {
        if header.stream_id() != self.config.stream_id {
            return Err(BlockWalError::UnexpectedState(format!(
                "block {} belongs to stream {}, expected {}",
                block_id,
                header.stream_id(),
                self.config.stream_id
            )));
        }
        if header.block_id() != block_id {
            return Err(BlockWalError::UnexpectedState(format!(
                "block file {} carries header for block {}",
                block_id,
                header.block_id()
            )));
        }
        if header.is_meta() != (self.config.stream_kind == StreamKind::Meta) {
            return Err(BlockWalError::UnexpectedState(format!(
                "block {} stream kind does not match {:?}",
                block_id, self.config.stream_kind
            )));
        }
        if self.layout.block_of(header.min_position()) != block_id {
            return Err(BlockWalError::UnexpectedState(format!(
                "block {} header points at position {} outside the block",
                block_id,
                header.min_position()
            )));
        }
        Ok(())
    }

    fn raw_source(&self) -> RawSource<'_> {
        RawSource {
            layout: &self.layout,
            reader: self.reader.as_ref(),
        }
    }
}
