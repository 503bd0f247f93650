//! Block Pool
//!
//! Pre-reserves zero-filled, block-sized extents so a block switch only has
//! to rename a file instead of allocating one.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{BlockWalError, Result};

/// A reserved, zero-filled file of block size
#[derive(Debug)]
pub struct PooledExtent {
    /// Where the extent currently lives
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Source of block-sized extents
pub trait BlockPool: Send + Sync {
    /// Hand out an extent of `expected_size` bytes
    fn acquire(&self, expected_size: u64) -> Result<PooledExtent>;

    /// Give back an extent that was never installed as a block
    fn release(&self, extent: PooledExtent) -> Result<()>;
}

/// Filesystem-backed pool keeping spare extents in one directory
///
/// ## Concurrency:
/// - `spares`: Protected by Mutex (acquire/release from any engine)
/// - `next_extent_id`: Atomic counter (lock-free)
pub struct FsBlockPool {
    /// Directory holding spare extents
    dir: PathBuf,

    /// Size of every extent
    extent_size: u64,

    /// Spares to keep ready
    capacity: usize,

    /// Ready extents
    spares: Mutex<Vec<PathBuf>>,

    /// Next extent file number
    next_extent_id: AtomicU64,
}

impl FsBlockPool {
    /// Open or create a pool directory and fill it up to `capacity`
    ///
    /// Existing extents of the right size are reused; anything else in the
    /// directory is removed.
    pub fn open(dir: &Path, extent_size: u64, capacity: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut spares = Vec::new();
        let mut max_id = 0u64;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match Self::parse_extent_id(&path) {
                Some(id) if fs::metadata(&path)?.len() == extent_size => {
                    max_id = max_id.max(id + 1);
                    spares.push(path);
                }
                _ => fs::remove_file(&path)?,
            }
        }

        let pool = Self {
            dir: dir.to_path_buf(),
            extent_size,
            capacity,
            spares: Mutex::new(spares),
            next_extent_id: AtomicU64::new(max_id),
        };
        pool.refill()?;
        Ok(pool)
    }

    /// Pool under `{data_dir}/pool` sized for `config`'s blocks
    pub fn for_config(config: &Config) -> Result<Self> {
        Self::open(
            &config.data_dir.join("pool"),
            config.physical_block_size(),
            config.pool_capacity,
        )
    }

    /// Top the spare list up to capacity
    pub fn refill(&self) -> Result<()> {
        let mut spares = self.spares.lock();
        while spares.len() < self.capacity {
            let path = self.reserve_extent()?;
            spares.push(path);
        }
        Ok(())
    }

    /// Number of ready extents
    pub fn spare_count(&self) -> usize {
        self.spares.lock().len()
    }

    /// Get the pool directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reserve_extent(&self) -> Result<PathBuf> {
        let id = self.next_extent_id.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("extent_{:06}.tmp", id));
        let file = File::create(&path)?;
        // Sparse until written; reads come back as zeros
        file.set_len(self.extent_size)?;
        file.sync_all()?;
        Ok(path)
    }

    /// "extent_000042.tmp" → Some(42)
    fn parse_extent_id(path: &Path) -> Option<u64> {
        if path.extension()? != "tmp" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("extent_")?.parse().ok()
    }
}

impl BlockPool for FsBlockPool {
    fn acquire(&self, expected_size: u64) -> Result<PooledExtent> {
        if expected_size != self.extent_size {
            return Err(BlockWalError::AllocationFailed(format!(
                "pool serves {} byte extents, {} requested",
                self.extent_size, expected_size
            )));
        }

        let ready = self.spares.lock().pop();
        let path = match ready {
            Some(path) => path,
            None => self.reserve_extent().map_err(|e| {
                BlockWalError::AllocationFailed(format!("cannot reserve extent: {}", e))
            })?,
        };

        Ok(PooledExtent {
            path,
            size: self.extent_size,
        })
    }

    fn release(&self, extent: PooledExtent) -> Result<()> {
        let mut spares = self.spares.lock();
        if extent.size == self.extent_size && spares.len() < self.capacity {
            spares.push(extent.path);
        } else {
            fs::remove_file(&extent.path)?;
        }
        Ok(())
    }
}

/// Pool without spares that never touches the filesystem
///
/// For engines that must not create blocks, such as offline inspection.
/// Every `acquire` fails with `AllocationFailed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSparePool;

impl BlockPool for NoSparePool {
    fn acquire(&self, expected_size: u64) -> Result<PooledExtent> {
        Err(BlockWalError::AllocationFailed(format!(
            "no spare extents for a {} byte block",
            expected_size
        )))
    }

    fn release(&self, _extent: PooledExtent) -> Result<()> {
        Ok(())
    }
}
