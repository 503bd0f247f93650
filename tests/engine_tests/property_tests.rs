//! Property tests for BlockStorage
//!
//! These tests verify, over random block sizes and entry sizes:
//! - Every appended byte reads back at its position
//! - Reload finds the same tail and the same records
//! - Truncation at any entry boundary survives reload

use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use blockwal::block::FsBlockPool;
use blockwal::record::LogEntryCodec;
use blockwal::{BlockStorage, Config, NoopObserver, Position, SyncStrategy};

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &Path, block_pages: u64) -> Config {
    Config::builder()
        .data_dir(dir)
        .logical_block_size(block_pages * 4096)
        .sync_strategy(SyncStrategy::EveryNAppends { count: 16 })
        .pool_capacity(1)
        .build()
}

fn init(dir: &Path, block_pages: u64) -> BlockStorage {
    let config = config_for(dir, block_pages);
    let pool = Arc::new(FsBlockPool::for_config(&config).unwrap());
    BlockStorage::init(config, NoopObserver, pool).unwrap()
}

fn load(dir: &Path, block_pages: u64) -> BlockStorage {
    let config = config_for(dir, block_pages);
    let pool = Arc::new(FsBlockPool::for_config(&config).unwrap());
    BlockStorage::load::<LogEntryCodec>(config, NoopObserver, pool)
        .unwrap()
        .0
}

/// Append one entry per size; returns positions and the full byte image
fn write_entries(storage: &BlockStorage, sizes: &[usize]) -> (Vec<Position>, Vec<u8>) {
    let mut positions = Vec::new();
    let mut image = Vec::new();
    for (i, &size) in sizes.iter().enumerate() {
        let position = storage.get_end_position();
        let payload = vec![(i % 255) as u8 + 1; size];
        let entry = LogEntryCodec::encode(position, i as i64, &payload).unwrap();
        storage.append(position, i as i64, &entry).unwrap();
        positions.push(position);
        image.extend_from_slice(&entry);
    }
    (positions, image)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: any range below the tail reads back exactly what was appended
    #[test]
    fn test_reads_match_appended_bytes(
        block_pages in 1..4u64,
        sizes in proptest::collection::vec(1..3000usize, 1..40),
        ranges in proptest::collection::vec((0.0..1.0f64, 0.0..1.0f64), 1..10),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let storage = init(temp_dir.path(), block_pages);
        let (_, image) = write_entries(&storage, &sizes);

        prop_assert_eq!(storage.get_end_position(), Position(image.len() as u64));

        for (a, b) in ranges {
            let start = (a * image.len() as f64) as usize;
            let len = (b * (image.len() - start) as f64) as usize;
            let bytes = storage.read(Position(start as u64), len as u64).unwrap();
            prop_assert_eq!(&bytes[..], &image[start..start + len]);
        }
    }

    /// Property: reload recovers the same tail and every record
    #[test]
    fn test_reload_recovers_all_records(
        block_pages in 1..4u64,
        sizes in proptest::collection::vec(1..3000usize, 1..40),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let (positions, image) = {
            let storage = init(temp_dir.path(), block_pages);
            write_entries(&storage, &sizes)
        };

        let storage = load(temp_dir.path(), block_pages);
        prop_assert_eq!(storage.get_end_position(), Position(image.len() as u64));

        let found: Vec<Position> = storage
            .records::<LogEntryCodec>(Position(0))
            .unwrap()
            .map(|r| r.unwrap().position)
            .collect();
        prop_assert_eq!(found, positions);
    }

    /// Property: truncating at an entry boundary survives reload
    #[test]
    fn test_truncate_survives_reload(
        block_pages in 1..3u64,
        sizes in proptest::collection::vec(1..3000usize, 2..30),
        cut in 0.0..1.0f64,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let keep = (cut * sizes.len() as f64) as usize;
        let positions = {
            let storage = init(temp_dir.path(), block_pages);
            let (positions, _) = write_entries(&storage, &sizes);
            storage.truncate(positions[keep]).unwrap();
            positions
        };

        let storage = load(temp_dir.path(), block_pages);
        prop_assert_eq!(storage.get_end_position(), positions[keep]);
        prop_assert_eq!(
            storage.records::<LogEntryCodec>(Position(0)).unwrap().count(),
            keep
        );
    }
}
