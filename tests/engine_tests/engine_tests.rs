//! Tests for BlockStorage
//!
//! These tests verify:
//! - Fresh initialization and lazy block creation
//! - Append, batch append and block switching
//! - Reads by position, including ranges that cross blocks
//! - Bounds checks on reads
//! - Observer notifications and pool failures
//! - Lifecycle (ownership, shutdown) and concurrent readers

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use blockwal::block::{BlockPool, FsBlockManager, FsBlockPool, FsBlockReader, PooledExtent};
use blockwal::record::{IterStep, LogEntryCodec};
use blockwal::{
    BlockId, BlockStorage, BlockSwitchEvent, BlockWalError, Config, NoopObserver, Position,
    StreamKind, SyncStrategy,
};
use tempfile::TempDir;

const BLOCK: u64 = 4096;

/// Encoded size of a 1000-byte payload entry
const BIG_ENTRY: u64 = 1032;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .logical_block_size(BLOCK)
        .sync_strategy(SyncStrategy::EveryWrite) // Sync every write for test reliability
        .pool_capacity(2)
        .build()
}

fn open_with(config: Config) -> BlockStorage {
    let pool = Arc::new(FsBlockPool::for_config(&config).unwrap());
    BlockStorage::init(config, NoopObserver, pool).unwrap()
}

fn setup_temp_storage() -> (TempDir, BlockStorage) {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_with(test_config(&temp_dir));
    (temp_dir, storage)
}

/// Append one log entry at the tail; returns its position and encoded bytes
fn append_entry(storage: &BlockStorage, timestamp: i64, payload_len: usize) -> (Position, Vec<u8>) {
    let position = storage.get_end_position();
    let payload = vec![(timestamp % 251) as u8 + 1; payload_len];
    let entry = LogEntryCodec::encode(position, timestamp, &payload).unwrap();
    storage.append(position, timestamp, &entry).unwrap();
    (position, entry)
}

/// Pool that never has an extent to give
struct ExhaustedPool;

impl BlockPool for ExhaustedPool {
    fn acquire(&self, _expected_size: u64) -> blockwal::Result<PooledExtent> {
        Err(BlockWalError::AllocationFailed("pool is empty".to_string()))
    }

    fn release(&self, _extent: PooledExtent) -> blockwal::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_init_creates_no_block() {
    let (_temp, storage) = setup_temp_storage();

    assert!(storage.get_block_id_range().is_none());
    assert_eq!(storage.get_begin_position(), Position(0));
    assert_eq!(storage.get_end_position(), Position(0));
}

#[test]
fn test_init_with_base_position() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .logical_block_size(BLOCK)
        .base_position(10_000)
        .build();
    let storage = open_with(config);

    assert_eq!(storage.get_begin_position(), Position(10_000));
    assert_eq!(storage.get_end_position(), Position(10_000));

    append_entry(&storage, 1, 10);
    assert_eq!(storage.get_block_id_range(), Some((BlockId(2), BlockId(2))));
    assert_eq!(storage.get_begin_position(), Position(10_000));
}

#[test]
fn test_init_with_explicit_collaborators() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let manager = FsBlockManager::open(&config.data_dir, config.physical_block_size()).unwrap();
    let reader = FsBlockReader::new(manager.dir());
    let pool = Arc::new(FsBlockPool::for_config(&config).unwrap());

    let storage =
        BlockStorage::init_with(config, NoopObserver, pool, Box::new(manager), Box::new(reader))
            .unwrap();
    let (position, entry) = append_entry(&storage, 1, 10);

    assert_eq!(&storage.read(position, entry.len() as u64).unwrap()[..], &entry[..]);
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let pool: Arc<dyn BlockPool> = Arc::new(ExhaustedPool);

    let unaligned = Config::builder()
        .data_dir(temp_dir.path())
        .logical_block_size(1000)
        .build();
    let result = BlockStorage::init(unaligned, NoopObserver, Arc::clone(&pool));
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));

    let bad_stream = Config::builder()
        .data_dir(temp_dir.path())
        .stream_id(u64::MAX)
        .build();
    let result = BlockStorage::init(bad_stream, NoopObserver, pool);
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
}

#[test]
fn test_second_owner_already_initialized() {
    let temp_dir = TempDir::new().unwrap();
    let _first = open_with(test_config(&temp_dir));

    let pool: Arc<dyn BlockPool> = Arc::new(ExhaustedPool);
    let result = BlockStorage::init(test_config(&temp_dir), NoopObserver, pool);
    assert!(matches!(result, Err(BlockWalError::AlreadyInitialized)));
}

#[test]
fn test_fresh_init_over_existing_blocks_already_initialized() {
    let temp_dir = TempDir::new().unwrap();
    {
        let storage = open_with(test_config(&temp_dir));
        append_entry(&storage, 1, 10);
        storage.shutdown().unwrap();
    }

    let pool = Arc::new(FsBlockPool::for_config(&test_config(&temp_dir)).unwrap());
    let result = BlockStorage::init(test_config(&temp_dir), NoopObserver, pool);
    assert!(matches!(result, Err(BlockWalError::AlreadyInitialized)));
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_first_append_creates_block() {
    let (temp, storage) = setup_temp_storage();

    let (position, entry) = append_entry(&storage, 7, 100);

    assert_eq!(position, Position(0));
    assert_eq!(storage.get_end_position(), Position(entry.len() as u64));
    assert_eq!(storage.get_block_id_range(), Some((BlockId(0), BlockId(0))));
    assert!(temp.path().join("block_00000000000000000000.blk").exists());
    assert_eq!(storage.get_block_min_timestamp(BlockId(0)).unwrap(), 7);
}

#[test]
fn test_append_rejects_wrong_position() {
    let (_temp, storage) = setup_temp_storage();
    append_entry(&storage, 1, 10);

    let result = storage.append(Position(0), 2, b"again");
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));

    let tail = storage.get_end_position();
    let result = storage.append(Position(tail.0 + 1), 2, b"gap");
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
    assert_eq!(storage.get_end_position(), tail);
}

#[test]
fn test_append_rejects_empty_buffer() {
    let (_temp, storage) = setup_temp_storage();

    let result = storage.append(Position(0), 1, b"");
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
    assert!(storage.get_block_id_range().is_none());
}

#[test]
fn test_append_straddles_block_boundary() {
    let (_temp, storage) = setup_temp_storage();

    let mut entries = Vec::new();
    for ts in 0..4 {
        entries.push(append_entry(&storage, ts, 1000));
    }

    // The fourth entry starts in block 0 and ends in block 1
    let (position, entry) = &entries[3];
    assert_eq!(*position, Position(3 * BIG_ENTRY));
    assert_eq!(storage.get_end_position(), Position(4 * BIG_ENTRY));
    assert_eq!(storage.get_block_id_range(), Some((BlockId(0), BlockId(1))));
    assert_eq!(&storage.read(*position, BIG_ENTRY).unwrap()[..], &entry[..]);

    // No record starts in block 1 yet
    let result = storage.get_block_min_timestamp(BlockId(1));
    assert!(matches!(result, Err(BlockWalError::UnexpectedState(_))));

    append_entry(&storage, 40, 1000);
    assert_eq!(storage.get_block_min_timestamp(BlockId(0)).unwrap(), 0);
    assert_eq!(storage.get_block_min_timestamp(BlockId(1)).unwrap(), 40);
}

#[test]
fn test_buffer_filling_block_exactly() {
    let (_temp, storage) = setup_temp_storage();

    let block = vec![0x5Au8; BLOCK as usize];
    storage.append(Position(0), 1, &block).unwrap();
    assert_eq!(storage.get_block_id_range(), Some((BlockId(0), BlockId(0))));

    // Next append lands in a new block
    storage.append(Position(BLOCK), 2, b"next").unwrap();
    assert_eq!(storage.get_block_id_range(), Some((BlockId(0), BlockId(1))));
    assert_eq!(storage.get_block_min_timestamp(BlockId(1)).unwrap(), 2);
    assert_eq!(&storage.read(Position(BLOCK - 2), 6).unwrap()[..], b"\x5A\x5Anext");
}

#[test]
fn test_buffer_spanning_several_blocks() {
    let (_temp, storage) = setup_temp_storage();

    let data: Vec<u8> = (0..3 * BLOCK + 100).map(|i| (i % 253) as u8).collect();
    storage.append(Position(0), 1, &data).unwrap();

    assert_eq!(storage.get_block_id_range(), Some((BlockId(0), BlockId(3))));
    assert_eq!(&storage.read(Position(0), data.len() as u64).unwrap()[..], &data[..]);
}

#[test]
fn test_append_batch() {
    let (_temp, storage) = setup_temp_storage();

    let a = LogEntryCodec::encode(Position(0), 1, b"first").unwrap();
    let b_pos = Position(a.len() as u64);
    let b = LogEntryCodec::encode(b_pos, 2, b"second").unwrap();

    storage
        .append_batch(&[Position(0), b_pos], &[1, 2], &[&a, &b])
        .unwrap();

    assert_eq!(storage.get_end_position(), Position((a.len() + b.len()) as u64));
    assert_eq!(&storage.read(b_pos, b.len() as u64).unwrap()[..], &b[..]);
}

#[test]
fn test_append_batch_rejects_gap_without_writing() {
    let (_temp, storage) = setup_temp_storage();

    let result = storage.append_batch(&[Position(0), Position(100)], &[1, 2], &[b"abc", b"def"]);

    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
    assert_eq!(storage.get_end_position(), Position(0));
    assert!(storage.get_block_id_range().is_none());
}

#[test]
fn test_append_batch_rejects_length_mismatch() {
    let (_temp, storage) = setup_temp_storage();

    let result = storage.append_batch(&[Position(0)], &[1, 2], &[b"abc"]);
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
}

#[test]
fn test_log_stream_rejects_append_meta() {
    let (_temp, storage) = setup_temp_storage();

    let result = storage.append_meta(1, b"manifest");
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
}

#[test]
fn test_meta_stream_rejects_append() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .logical_block_size(BLOCK)
        .stream_kind(StreamKind::Meta)
        .build();
    let storage = open_with(config);

    let result = storage.append(Position(0), 1, b"raw");
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
}

#[test]
fn test_allocation_failure_leaves_tail() {
    let temp_dir = TempDir::new().unwrap();
    let storage =
        BlockStorage::init(test_config(&temp_dir), NoopObserver, Arc::new(ExhaustedPool)).unwrap();

    let result = storage.append(Position(0), 1, b"data");

    assert!(matches!(result, Err(BlockWalError::AllocationFailed(_))));
    assert_eq!(storage.get_end_position(), Position(0));
    assert!(storage.get_block_id_range().is_none());
}

// =============================================================================
// Observer Tests
// =============================================================================

#[test]
fn test_observer_sees_every_switch_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let pool = Arc::new(FsBlockPool::for_config(&config).unwrap());

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let storage = BlockStorage::init(
        config,
        move |event: &BlockSwitchEvent| seen.lock().push(*event),
        pool,
    )
    .unwrap();

    for ts in 0..10 {
        append_entry(&storage, ts, 1000);
    }

    let events = events.lock();
    assert_eq!(
        *events,
        vec![
            BlockSwitchEvent { previous: None, current: BlockId(0) },
            BlockSwitchEvent { previous: Some(BlockId(0)), current: BlockId(1) },
            BlockSwitchEvent { previous: Some(BlockId(1)), current: BlockId(2) },
        ]
    );
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_read_below_begin_is_out_of_lower_bound() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .logical_block_size(BLOCK)
        .base_position(100)
        .build();
    let storage = open_with(config);
    append_entry(&storage, 1, 10);

    let result = storage.read(Position(50), 10);
    assert!(matches!(result, Err(BlockWalError::OutOfLowerBound { requested: 50, begin: 100 })));
}

#[test]
fn test_read_inside_active_block_slack() {
    let (_temp, storage) = setup_temp_storage();
    let (_, entry) = append_entry(&storage, 1, 100);
    let tail = entry.len() as u64;

    // Unwritten space of the active block reads as zeros
    let slack = storage.read(Position(tail), 64).unwrap();
    assert!(slack.iter().all(|&b| b == 0));

    let result = storage.read(Position(BLOCK - 10), 20);
    assert!(matches!(result, Err(BlockWalError::OutOfUpperBound { .. })));
}

#[test]
fn test_read_before_any_block_is_out_of_upper_bound() {
    let (_temp, storage) = setup_temp_storage();

    let result = storage.read(Position(0), 1);
    assert!(matches!(result, Err(BlockWalError::OutOfUpperBound { .. })));
}

#[test]
fn test_zero_length_read() {
    let (_temp, storage) = setup_temp_storage();
    append_entry(&storage, 1, 10);

    assert!(storage.read(Position(0), 0).unwrap().is_empty());
}

#[test]
fn test_read_without_header() {
    let (_temp, storage) = setup_temp_storage();
    for ts in 0..4 {
        append_entry(&storage, ts, 1000);
    }

    let split = storage.read(Position(BIG_ENTRY), BIG_ENTRY).unwrap();
    let direct = storage.read_without_header(Position(BIG_ENTRY), BIG_ENTRY).unwrap();
    assert_eq!(direct, split);

    let result = storage.read_without_header(Position(3 * BIG_ENTRY), BIG_ENTRY);
    assert!(matches!(result, Err(BlockWalError::InvalidArgument(_))));
}

#[test]
fn test_records_iterates_entries() {
    let (_temp, storage) = setup_temp_storage();
    let mut expected = Vec::new();
    for ts in 0..6 {
        expected.push(append_entry(&storage, ts, 700).0);
    }

    let positions: Vec<Position> = storage
        .records::<LogEntryCodec>(Position(0))
        .unwrap()
        .map(|r| r.unwrap().position)
        .collect();
    assert_eq!(positions, expected);
}

#[test]
fn test_iter_follows_new_appends() {
    let (_temp, storage) = setup_temp_storage();
    append_entry(&storage, 1, 10);

    let mut iter = storage.iter::<LogEntryCodec>(Position(0)).unwrap();
    assert!(matches!(iter.next_record().unwrap(), IterStep::Record(_)));
    assert!(matches!(iter.next_record().unwrap(), IterStep::EndOfData));

    let (position, _) = append_entry(&storage, 2, 10);
    match iter.next_record().unwrap() {
        IterStep::Record(record) => assert_eq!(record.position, position),
        other => panic!("expected a record, got {:?}", other),
    }
}

// =============================================================================
// Accessor Tests
// =============================================================================

#[test]
fn test_block_min_timestamp_out_of_range() {
    let (_temp, storage) = setup_temp_storage();
    append_entry(&storage, 1, 10);

    let result = storage.get_block_min_timestamp(BlockId(5));
    assert!(matches!(result, Err(BlockWalError::OutOfUpperBound { .. })));
}

#[test]
fn test_committed_end_only_moves_forward() {
    let (_temp, storage) = setup_temp_storage();
    assert!(storage.committed_end().is_none());

    storage.set_committed_end(Position(100));
    storage.set_committed_end(Position(50));
    assert_eq!(storage.committed_end(), Some(Position(100)));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_calls_after_shutdown_not_initialized() {
    let (_temp, storage) = setup_temp_storage();
    append_entry(&storage, 1, 10);
    storage.shutdown().unwrap();

    assert!(matches!(storage.append(Position(42), 1, b"x"), Err(BlockWalError::NotInitialized)));
    assert!(matches!(storage.read(Position(0), 1), Err(BlockWalError::NotInitialized)));
    assert!(matches!(storage.shutdown(), Err(BlockWalError::NotInitialized)));
}

#[test]
fn test_sync_with_batched_strategy() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .logical_block_size(BLOCK)
        .sync_strategy(SyncStrategy::EveryNAppends { count: 1000 })
        .pool_capacity(1)
        .build();
    let storage = open_with(config);

    // Nothing to sync before the first block exists
    storage.sync().unwrap();

    append_entry(&storage, 1, 10);
    storage.sync().unwrap();
    storage.shutdown().unwrap();

    assert!(matches!(storage.sync(), Err(BlockWalError::NotInitialized)));
}

#[test]
fn test_shutdown_releases_directory() {
    let temp_dir = TempDir::new().unwrap();
    let first = open_with(test_config(&temp_dir));
    first.shutdown().unwrap();

    // No block was written, so a fresh init is allowed again
    let _second = open_with(test_config(&temp_dir));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_see_complete_records() {
    let (_temp, storage) = setup_temp_storage();
    let storage = Arc::new(storage);

    let writer = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || {
            for ts in 0..200 {
                append_entry(&storage, ts, 300);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                for _ in 0..20 {
                    for record in storage.records::<LogEntryCodec>(Position(0)).unwrap() {
                        record.unwrap();
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let count = storage.records::<LogEntryCodec>(Position(0)).unwrap().count();
    assert_eq!(count, 200);
}
