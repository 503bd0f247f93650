//! Engine Module
//!
//! The block storage engine: one logical, byte-addressable stream spread over
//! fixed-size block files.
//!
//! ## Responsibilities
//! - Append at the tail, switching blocks when the active one fills up
//! - Serve reads by position, hiding block headers and boundaries
//! - Suffix truncation and prefix reclamation
//! - Crash recovery on startup (see `recovery`)

mod observer;
mod recovery;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::addressing::{BlockId, BlockLayout, Position, StreamId};
use crate::block::{
    BlockHandle, BlockHeader, BlockManager, BlockPool, BlockReader, FsBlockManager, FsBlockReader,
    BLOCK_HEADER_SIZE, FLAG_META,
};
use crate::config::{Config, StreamKind, SyncStrategy};
use crate::error::{BlockWalError, Result};
use crate::record::{encode_meta_frame, PositionSource, RecordCodec, RecordIterator};

pub use observer::{BlockSwitchEvent, BlockSwitchObserver, NoopObserver};
pub use recovery::TailScan;

/// Tail and the cached header of the active block
#[derive(Debug, Clone, Copy)]
struct TailState {
    /// Position right after the last appended byte
    tail: Position,
    /// Header of the active block, once written
    header: Option<BlockHeader>,
}

/// Existing blocks
#[derive(Debug, Clone, Copy)]
struct BlockRange {
    /// Lowest retained block (also the floor when no block exists yet)
    min: BlockId,
    /// Highest existing block, None before the first block is created
    max: Option<BlockId>,
}

/// State only the append path touches
struct ActiveWriter {
    /// Open active block
    handle: Option<BlockHandle>,
    /// Record bytes left in the active block
    writable_size: u64,
    /// Active block has no header yet
    needs_header: bool,
    /// Appends since the last sync
    unsynced: usize,
}

/// The block storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - `tail` (tail lock): tail position + active header. Held only for
///   in-memory bookkeeping, never across I/O.
/// - `blocks` (deletion lock): the existing block range. Readers hold it
///   shared for the whole read; deletion, truncation and block switches take
///   it exclusively.
/// - `writer`: the append cursor. Taken by append, truncate, and shutdown.
///
/// Lock order: writer → blocks → tail.
pub struct BlockStorage {
    config: Config,
    layout: BlockLayout,

    /// Position the stream started at
    base_position: Position,

    manager: Box<dyn BlockManager>,
    reader: Box<dyn BlockReader>,
    pool: Arc<dyn BlockPool>,
    observer: Box<dyn BlockSwitchObserver>,

    writer: Mutex<ActiveWriter>,
    tail: Mutex<TailState>,
    blocks: RwLock<BlockRange>,

    /// Highest committed position reported by the consensus layer
    committed_end: AtomicU64,

    /// Set by `shutdown`
    closed: AtomicBool,
}

impl BlockStorage {
    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize a fresh stream in `config.data_dir`
    ///
    /// Fails with `AlreadyInitialized` when the directory is owned by another
    /// live engine or already holds blocks (use `load` instead).
    pub fn init(
        config: Config,
        observer: impl BlockSwitchObserver + 'static,
        pool: Arc<dyn BlockPool>,
    ) -> Result<Self> {
        config.validate()?;
        let manager = FsBlockManager::open(&config.data_dir, config.physical_block_size())?;
        let reader = FsBlockReader::new(manager.dir());
        Self::init_with(config, observer, pool, Box::new(manager), Box::new(reader))
    }

    /// Fresh init with caller-supplied collaborators
    pub fn init_with(
        config: Config,
        observer: impl BlockSwitchObserver + 'static,
        pool: Arc<dyn BlockPool>,
        manager: Box<dyn BlockManager>,
        reader: Box<dyn BlockReader>,
    ) -> Result<Self> {
        if let Some((min, max)) = manager.get_block_id_range()? {
            warn!(
                min_block = min.0,
                max_block = max.0,
                "fresh init on a directory that already holds blocks"
            );
            return Err(BlockWalError::AlreadyInitialized);
        }

        let storage = Self::assemble(config, Box::new(observer), pool, manager, reader)?;
        info!(
            stream_id = storage.config.stream_id.0,
            base_position = storage.base_position.0,
            logical_block_size = storage.layout.logical_block_size(),
            "block storage initialized"
        );
        Ok(storage)
    }

    /// Build the engine in its empty state
    fn assemble(
        config: Config,
        observer: Box<dyn BlockSwitchObserver>,
        pool: Arc<dyn BlockPool>,
        manager: Box<dyn BlockManager>,
        reader: Box<dyn BlockReader>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = BlockLayout::new(config.logical_block_size)?;
        let base_position = config.base_position;
        let floor = layout.block_of(base_position);

        Ok(Self {
            config,
            layout,
            base_position,
            manager,
            reader,
            pool,
            observer,
            writer: Mutex::new(ActiveWriter {
                handle: None,
                writable_size: 0,
                needs_header: true,
                unsynced: 0,
            }),
            tail: Mutex::new(TailState {
                tail: base_position,
                header: None,
            }),
            blocks: RwLock::new(BlockRange {
                min: floor,
                max: None,
            }),
            committed_end: AtomicU64::new(Position::INVALID.0),
            closed: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Append Path
    // =========================================================================

    /// Append one buffer at `position`, which must equal the current tail
    ///
    /// `timestamp` becomes the block's min timestamp if this buffer is the
    /// first record starting in the active block.
    pub fn append(&self, position: Position, timestamp: i64, buffer: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.ensure_kind(StreamKind::Log, "append")?;
        let mut writer = self.writer.lock();
        self.append_locked(&mut writer, position, timestamp, buffer)
    }

    /// Append several contiguous buffers in one call
    pub fn append_batch(
        &self,
        positions: &[Position],
        timestamps: &[i64],
        buffers: &[&[u8]],
    ) -> Result<()> {
        self.ensure_open()?;
        self.ensure_kind(StreamKind::Log, "append_batch")?;
        if positions.len() != buffers.len() || timestamps.len() != buffers.len() {
            return Err(BlockWalError::InvalidArgument(format!(
                "batch lengths differ: {} positions, {} timestamps, {} buffers",
                positions.len(),
                timestamps.len(),
                buffers.len()
            )));
        }

        let mut writer = self.writer.lock();

        // Validate the whole batch before writing any of it
        let mut expected = self.get_end_position();
        for (position, buffer) in positions.iter().zip(buffers) {
            if buffer.is_empty() {
                return Err(BlockWalError::InvalidArgument(
                    "cannot append an empty buffer".to_string(),
                ));
            }
            if *position != expected {
                return Err(BlockWalError::InvalidArgument(format!(
                    "batch position {} is not contiguous, expected {}",
                    position, expected
                )));
            }
            expected = expected.checked_add(buffer.len() as u64)?;
        }

        for ((position, timestamp), buffer) in positions.iter().zip(timestamps).zip(buffers) {
            self.append_locked(&mut writer, *position, *timestamp, buffer)?;
        }
        Ok(())
    }

    /// Append a meta record at the tail; returns where it was written
    pub fn append_meta(&self, timestamp: i64, buffer: &[u8]) -> Result<Position> {
        self.ensure_open()?;
        self.ensure_kind(StreamKind::Meta, "append_meta")?;
        let frame = encode_meta_frame(buffer)?;

        let mut writer = self.writer.lock();
        let position = self.get_end_position();
        self.append_locked(&mut writer, position, timestamp, &frame)?;
        Ok(position)
    }

    /// Write `buffer` at `position` (writer lock held)
    fn append_locked(
        &self,
        writer: &mut ActiveWriter,
        position: Position,
        timestamp: i64,
        buffer: &[u8],
    ) -> Result<()> {
        if buffer.is_empty() {
            return Err(BlockWalError::InvalidArgument(
                "cannot append an empty buffer".to_string(),
            ));
        }
        let tail = self.get_end_position();
        if position != tail {
            return Err(BlockWalError::InvalidArgument(format!(
                "append at {} but tail is {}",
                position, tail
            )));
        }
        let end = position.checked_add(buffer.len() as u64)?;
        self.resync_cursor(writer, position);

        let mut cursor = position;
        let mut rest = buffer;
        let mut written_header = None;

        while !rest.is_empty() {
            if writer.handle.is_none() || writer.writable_size == 0 {
                self.switch_block(writer, cursor)?;
            }
            let handle = writer.handle.as_mut().ok_or_else(|| {
                BlockWalError::UnexpectedState("no active block after switch".to_string())
            })?;

            // Header goes in with the first record that starts in the block
            if cursor == position && writer.needs_header {
                let header = BlockHeader::new(
                    self.config.stream_id,
                    handle.block_id(),
                    position,
                    timestamp,
                    self.header_flags(),
                );
                handle.write_at(0, &header.encode()?)?;
                writer.needs_header = false;
                written_header = Some(header);
            }

            let take = writer.writable_size.min(rest.len() as u64) as usize;
            let (_, physical_offset) = self.layout.locate(cursor);
            handle.write_at(physical_offset, &rest[..take])?;

            writer.writable_size -= take as u64;
            cursor = Position(cursor.0 + take as u64);
            rest = &rest[take..];
        }

        self.maybe_sync(writer)?;

        let active = writer.handle.as_ref().map(|h| h.block_id());
        let mut state = self.tail.lock();
        state.tail = end;
        if let Some(header) = written_header.filter(|h| Some(h.block_id()) == active) {
            state.header = Some(header);
        }
        drop(state);

        trace!(position = position.0, len = buffer.len(), "appended");
        Ok(())
    }

    /// Recompute the writable size from the tail
    fn resync_cursor(&self, writer: &mut ActiveWriter, tail: Position) {
        writer.writable_size = match writer.handle.as_ref() {
            Some(h) if h.block_id() == self.layout.block_of(tail) => {
                self.layout.remaining_in_block(tail)
            }
            _ => 0,
        };
    }

    /// Make the block holding `cursor` the active block
    ///
    /// The new block exists and the observer has run before this returns;
    /// the tail is untouched.
    fn switch_block(&self, writer: &mut ActiveWriter, cursor: Position) -> Result<()> {
        let target = self.layout.block_of(cursor);
        let previous = writer.handle.as_ref().map(|h| h.block_id());

        if let Some(handle) = writer.handle.as_mut() {
            handle.sync()?;
            writer.unsynced = 0;
        }

        let extent = self.pool.acquire(self.layout.physical_block_size())?;
        let handle = match self.manager.create_block(target, &extent) {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(release_err) = self.pool.release(extent) {
                    warn!(error = %release_err, "failed to return extent to pool");
                }
                return Err(e);
            }
        };

        {
            let mut blocks = self.blocks.write();
            if blocks.max.is_none() {
                blocks.min = target;
            }
            blocks.max = Some(target);
        }

        let event = BlockSwitchEvent {
            previous,
            current: target,
        };
        self.observer.on_block_switch(&event);

        writer.handle = Some(handle);
        writer.writable_size = self.layout.remaining_in_block(cursor);
        writer.needs_header = true;
        self.tail.lock().header = None;

        info!(
            stream_id = self.config.stream_id.0,
            previous = ?previous.map(|b| b.0),
            current = target.0,
            "switched active block"
        );
        Ok(())
    }

    fn maybe_sync(&self, writer: &mut ActiveWriter) -> Result<()> {
        writer.unsynced += 1;
        let due = match self.config.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNAppends { count } => writer.unsynced >= count,
        };
        if due {
            if let Some(handle) = writer.handle.as_mut() {
                handle.sync()?;
            }
            writer.unsynced = 0;
        }
        Ok(())
    }

    /// Force the active block to disk
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock();
        if let Some(handle) = writer.handle.as_mut() {
            handle.sync()?;
        }
        writer.unsynced = 0;
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read `len` record bytes starting at `position`
    ///
    /// Bounds:
    /// - `position < begin` → `OutOfLowerBound` (reclaimed)
    /// - `position + len` past the tail → `OutOfUpperBound`, except inside the
    ///   active block, whose unwritten slack may be read by catch-up readers
    pub fn read(&self, position: Position, len: u64) -> Result<Bytes> {
        self.ensure_open()?;
        let blocks = self.blocks.read();
        self.check_read_bounds(&blocks, position, len)?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        read_spans(&self.layout, self.reader.as_ref(), position, len)
    }

    /// Read a range known to lie inside one block's record region
    pub fn read_without_header(&self, position: Position, len: u64) -> Result<Bytes> {
        self.ensure_open()?;
        if len > self.layout.remaining_in_block(position) {
            return Err(BlockWalError::InvalidArgument(format!(
                "range {} + {} crosses a block boundary",
                position, len
            )));
        }

        let blocks = self.blocks.read();
        self.check_read_bounds(&blocks, position, len)?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        let (block_id, physical_offset) = self.layout.locate(position);
        self.reader.read(block_id, physical_offset, len as usize)
    }

    fn check_read_bounds(&self, blocks: &BlockRange, position: Position, len: u64) -> Result<()> {
        let begin = self.begin_of(blocks);
        if position < begin {
            return Err(BlockWalError::OutOfLowerBound {
                requested: position.0,
                begin: begin.0,
            });
        }

        let end = position.checked_add(len)?;
        let tail = self.tail.lock().tail;
        let readable_end = self.readable_end(blocks, tail);
        if end > readable_end {
            return Err(BlockWalError::OutOfUpperBound {
                requested: end.0,
                end: readable_end.0,
            });
        }
        Ok(())
    }

    /// Tail, stretched to the end of the active block when that block exists
    fn readable_end(&self, blocks: &BlockRange, tail: Position) -> Position {
        let active = self.layout.block_of(tail);
        match blocks.max {
            Some(max) if max >= active => self.layout.block_end(active),
            _ => tail,
        }
    }

    /// Walk records of codec `C` from `start` up to the (moving) tail
    pub fn iter<C: RecordCodec>(&self, start: Position) -> Result<RecordIterator<'_, C, Self>> {
        self.ensure_open()?;
        let begin = self.get_begin_position();
        let tail = self.get_end_position();
        if start < begin {
            return Err(BlockWalError::OutOfLowerBound {
                requested: start.0,
                begin: begin.0,
            });
        }
        if start > tail {
            return Err(BlockWalError::OutOfUpperBound {
                requested: start.0,
                end: tail.0,
            });
        }
        Ok(RecordIterator::new(start, self, move || {
            self.get_end_position()
        }))
    }

    /// `Iterator` over records of codec `C`; corruption surfaces as `InvalidData`
    pub fn records<C: RecordCodec>(
        &self,
        start: Position,
    ) -> Result<crate::record::Records<'_, C, Self>> {
        Ok(self.iter::<C>(start)?.into_records())
    }

    // =========================================================================
    // Truncation and Reclamation
    // =========================================================================

    /// Discard everything at or after `position`
    pub fn truncate(&self, position: Position) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock();
        let mut blocks = self.blocks.write();

        let begin = self.begin_of(&blocks);
        let tail = self.tail.lock().tail;
        if position < begin {
            return Err(BlockWalError::OutOfLowerBound {
                requested: position.0,
                begin: begin.0,
            });
        }
        if position > tail {
            return Err(BlockWalError::OutOfUpperBound {
                requested: position.0,
                end: tail.0,
            });
        }

        let header = self.rewind_to(&mut writer, &mut blocks, position)?;

        let mut state = self.tail.lock();
        state.tail = position;
        state.header = header;
        drop(state);

        info!(
            stream_id = self.config.stream_id.0,
            from = tail.0,
            to = position.0,
            "truncated stream suffix"
        );
        Ok(())
    }

    /// Put the append cursor at `position`, dropping every block and byte
    /// after it. Returns the header still valid for the new active block.
    fn rewind_to(
        &self,
        writer: &mut ActiveWriter,
        blocks: &mut BlockRange,
        position: Position,
    ) -> Result<Option<BlockHeader>> {
        let max = match blocks.max {
            Some(max) => max,
            None => {
                writer.handle = None;
                writer.writable_size = 0;
                writer.needs_header = true;
                return Ok(None);
            }
        };

        let target = self.layout.block_of(position);

        // Blocks entirely after the new tail
        let mut doomed = max;
        while doomed > target && doomed >= blocks.min {
            self.manager.delete_block(doomed)?;
            debug!(block_id = doomed.0, "deleted block past truncation point");
            match doomed.prev() {
                Some(prev) => doomed = prev,
                None => break,
            }
        }

        if target > max {
            // Tail sits exactly at the end of the last block
            let handle = self.reopen(writer, max)?;
            writer.handle = Some(handle);
            writer.writable_size = 0;
            writer.needs_header = false;
            return self.read_block_header(max);
        }

        blocks.max = Some(target);
        let (_, physical_offset) = self.layout.locate(position);
        self.manager.truncate_block(target, physical_offset)?;

        let on_disk = self.read_block_header(target)?;
        let header = on_disk.filter(|h| h.min_position() < position);

        let mut handle = self.reopen(writer, target)?;
        if on_disk.is_some() && header.is_none() {
            // First record of the block is gone
            handle.write_at(0, &[0u8; BLOCK_HEADER_SIZE])?;
        }
        handle.sync()?;

        writer.handle = Some(handle);
        writer.writable_size = self.layout.remaining_in_block(position);
        writer.needs_header = header.is_none();
        writer.unsynced = 0;
        Ok(header)
    }

    fn reopen(&self, writer: &mut ActiveWriter, block_id: BlockId) -> Result<BlockHandle> {
        match writer.handle.take() {
            Some(handle) if handle.block_id() == block_id => Ok(handle),
            _ => self.manager.open_block(block_id),
        }
    }

    /// Delete whole blocks below `position`; returns how many were deleted
    ///
    /// Never deletes the block containing `position`, the block containing the
    /// committed end, or the highest block.
    pub fn truncate_prefix_blocks(&self, position: Position) -> Result<usize> {
        self.ensure_open()?;
        let tail = self.get_end_position();
        if position > tail {
            return Err(BlockWalError::OutOfUpperBound {
                requested: position.0,
                end: tail.0,
            });
        }

        let mut blocks = self.blocks.write();
        let max = match blocks.max {
            Some(max) => max,
            None => return Ok(0),
        };

        let mut limit = self.layout.block_of(position).min(max);
        let committed = Position(self.committed_end.load(Ordering::Acquire));
        if committed.is_valid() {
            limit = limit.min(self.layout.block_of(committed));
        }

        // The new lowest block must start the record holding `position`
        while limit > blocks.min {
            match self.read_block_header(limit)? {
                Some(header) if header.min_position() <= position => break,
                _ => match limit.prev() {
                    Some(prev) => limit = prev,
                    None => break,
                },
            }
        }

        let mut deleted = 0;
        while blocks.min < limit {
            let block_id = blocks.min;
            self.manager.delete_block(block_id)?;
            blocks.min = block_id.next();
            deleted += 1;
        }

        if deleted > 0 {
            info!(
                stream_id = self.config.stream_id.0,
                deleted,
                new_min_block = blocks.min.0,
                "reclaimed prefix blocks"
            );
        }
        Ok(deleted)
    }

    /// Delete the lowest block
    ///
    /// - `block_id` below the range → `OutOfLowerBound`
    /// - `block_id` at or above the highest block → `OutOfUpperBound`
    /// - any other block than the lowest → `InvalidArgument`
    pub fn delete_block(&self, block_id: BlockId) -> Result<()> {
        self.ensure_open()?;
        let mut blocks = self.blocks.write();
        let max = blocks.max.ok_or(BlockWalError::OutOfUpperBound {
            requested: block_id.0,
            end: blocks.min.0,
        })?;

        if block_id < blocks.min {
            return Err(BlockWalError::OutOfLowerBound {
                requested: block_id.0,
                begin: blocks.min.0,
            });
        }
        if block_id >= max {
            return Err(BlockWalError::OutOfUpperBound {
                requested: block_id.0,
                end: max.0,
            });
        }
        if block_id != blocks.min {
            return Err(BlockWalError::InvalidArgument(format!(
                "only the lowest block {} can be deleted, not {}",
                blocks.min, block_id
            )));
        }

        self.manager.delete_block(block_id)?;
        blocks.min = block_id.next();
        debug!(block_id = block_id.0, "deleted block");
        Ok(())
    }

    /// Record the highest durably committed position
    ///
    /// Only moves forward; an invalid position is ignored.
    pub fn set_committed_end(&self, position: Position) {
        if !position.is_valid() {
            return;
        }
        let _ = self
            .committed_end
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current == Position::INVALID.0 || position.0 > current).then_some(position.0)
            });
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// `[min, max]` of existing blocks, None before the first block exists
    pub fn get_block_id_range(&self) -> Option<(BlockId, BlockId)> {
        let blocks = self.blocks.read();
        blocks.max.map(|max| (blocks.min, max))
    }

    /// First readable position
    pub fn get_begin_position(&self) -> Position {
        let blocks = self.blocks.read();
        self.begin_of(&blocks)
    }

    /// The tail: position right after the last appended byte
    pub fn get_end_position(&self) -> Position {
        self.tail.lock().tail
    }

    /// Min timestamp of a block, from its header
    pub fn get_block_min_timestamp(&self, block_id: BlockId) -> Result<i64> {
        self.ensure_open()?;
        let blocks = self.blocks.read();
        let max = blocks.max.ok_or(BlockWalError::OutOfUpperBound {
            requested: block_id.0,
            end: blocks.min.0,
        })?;
        if block_id < blocks.min {
            return Err(BlockWalError::OutOfLowerBound {
                requested: block_id.0,
                begin: blocks.min.0,
            });
        }
        if block_id > max {
            return Err(BlockWalError::OutOfUpperBound {
                requested: block_id.0,
                end: max.0,
            });
        }

        if let Some(header) = self.tail.lock().header {
            if header.block_id() == block_id {
                return Ok(header.min_timestamp);
            }
        }

        match self.read_block_header(block_id)? {
            Some(header) => Ok(header.min_timestamp),
            None => Err(BlockWalError::UnexpectedState(format!(
                "block {} holds no header",
                block_id
            ))),
        }
    }

    /// Committed end last reported, if any
    pub fn committed_end(&self) -> Option<Position> {
        let position = Position(self.committed_end.load(Ordering::Acquire));
        position.is_valid().then_some(position)
    }

    pub fn stream_id(&self) -> StreamId {
        self.config.stream_id
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Sync and close the stream; later calls fail with `NotInitialized`
    pub fn shutdown(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BlockWalError::NotInitialized);
        }
        if let Some(mut handle) = writer.handle.take() {
            handle.sync()?;
        }
        self.manager.close();
        info!(
            stream_id = self.config.stream_id.0,
            tail = self.tail.lock().tail.0,
            "block storage shut down"
        );
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BlockWalError::NotInitialized);
        }
        Ok(())
    }

    fn ensure_kind(&self, kind: StreamKind, op: &str) -> Result<()> {
        if self.config.stream_kind != kind {
            return Err(BlockWalError::InvalidArgument(format!(
                "{} is not available on a {:?} stream",
                op, self.config.stream_kind
            )));
        }
        Ok(())
    }

    fn header_flags(&self) -> u16 {
        match self.config.stream_kind {
            StreamKind::Log => 0,
            StreamKind::Meta => FLAG_META,
        }
    }

    fn begin_of(&self, blocks: &BlockRange) -> Position {
        self.base_position.max(self.layout.block_start(blocks.min))
    }

    /// Header of a block straight from disk
    fn read_block_header(&self, block_id: BlockId) -> Result<Option<BlockHeader>> {
        let region = self.reader.read(block_id, 0, BLOCK_HEADER_SIZE)?;
        BlockHeader::decode(&region)
    }
}

impl PositionSource for BlockStorage {
    fn read_range(&self, position: Position, len: u64) -> Result<Bytes> {
        self.read(position, len)
    }
}

impl Drop for BlockStorage {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(handle) = self.writer.get_mut().handle.as_mut() {
            if let Err(e) = handle.sync() {
                warn!(error = %e, "failed to sync active block on drop");
            }
        }
    }
}

/// Read a position range through `reader`, splitting at block boundaries
pub(crate) fn read_spans(
    layout: &BlockLayout,
    reader: &dyn BlockReader,
    position: Position,
    len: u64,
) -> Result<Bytes> {
    let spans = layout.split(position, len);
    if let [span] = spans.as_slice() {
        return reader.read(span.block_id, span.physical_offset, span.len as usize);
    }

    let mut out = BytesMut::with_capacity(len as usize);
    for span in spans {
        let piece = reader.read(span.block_id, span.physical_offset, span.len as usize)?;
        out.extend_from_slice(&piece);
    }
    Ok(out.freeze())
}
