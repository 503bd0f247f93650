//! Block Manager
//!
//! Owns the block directory of one stream.
//!
//! ## Responsibilities
//! - Discover existing block files on startup
//! - Install pool extents as new blocks
//! - Delete and shorten block files
//! - Refuse a second owner of the same directory inside the process

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::addressing::BlockId;
use crate::error::{BlockWalError, Result};

use super::{block_file_name, parse_block_id, BlockHandle, PooledExtent};

/// Block file lifecycle and enumeration
pub trait BlockManager: Send + Sync {
    /// Install `extent` as block `block_id` and open it for writing
    fn create_block(&self, block_id: BlockId, extent: &PooledExtent) -> Result<BlockHandle>;

    /// Open an existing block for writing
    fn open_block(&self, block_id: BlockId) -> Result<BlockHandle>;

    /// Remove a block file
    fn delete_block(&self, block_id: BlockId) -> Result<()>;

    /// Current `[min, max]` of existing blocks, or None if there are none
    fn get_block_id_range(&self) -> Result<Option<(BlockId, BlockId)>>;

    fn block_exists(&self, block_id: BlockId) -> bool;

    /// Drop every byte at or after `physical_len`, keeping the file's size
    fn truncate_block(&self, block_id: BlockId, physical_len: u64) -> Result<()>;

    /// Give up ownership of the directory; later calls are not expected
    fn close(&self) {}
}

/// Directories currently owned by a live `FsBlockManager`
static OWNED_DIRS: Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

/// Filesystem-backed block manager
///
/// ## Concurrency:
/// - Stateless apart from the directory path; every call goes to the filesystem
/// - Directory ownership is registered in a process-wide list and released on drop
pub struct FsBlockManager {
    /// Directory holding the block files (canonical)
    dir: PathBuf,

    /// Size every block file keeps on disk
    physical_block_size: u64,

    /// Still listed in the ownership registry
    registered: AtomicBool,
}

impl FsBlockManager {
    /// Open or create a block directory and take ownership of it
    ///
    /// Fails with `AlreadyInitialized` if another manager in this process
    /// owns the directory.
    pub fn open(dir: &Path, physical_block_size: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let dir = fs::canonicalize(dir)?;

        let mut owned = OWNED_DIRS.lock();
        if owned.contains(&dir) {
            return Err(BlockWalError::AlreadyInitialized);
        }
        owned.push(dir.clone());

        Ok(Self {
            dir,
            physical_block_size,
            registered: AtomicBool::new(true),
        })
    }

    /// Get the block directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a block file
    pub fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.dir.join(block_file_name(block_id))
    }

    /// All existing block ids, ascending
    pub fn list_blocks(&self) -> Result<Vec<BlockId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                if let Some(id) = parse_block_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn open_rw(&self, block_id: BlockId) -> Result<BlockHandle> {
        let path = self.block_path(block_id);
        let file = Self::open_existing(&path, block_id)?;
        Ok(BlockHandle::new(block_id, path, file))
    }

    fn open_existing(path: &Path, block_id: BlockId) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    BlockWalError::UnexpectedState(format!("block {} does not exist", block_id))
                }
                _ => BlockWalError::Io(e),
            })
    }
}

impl BlockManager for FsBlockManager {
    fn create_block(&self, block_id: BlockId, extent: &PooledExtent) -> Result<BlockHandle> {
        let path = self.block_path(block_id);
        if path.exists() {
            return Err(BlockWalError::UnexpectedState(format!(
                "block {} already exists",
                block_id
            )));
        }
        if extent.size != self.physical_block_size {
            return Err(BlockWalError::InvalidArgument(format!(
                "extent size {} does not match block size {}",
                extent.size, self.physical_block_size
            )));
        }

        fs::rename(&extent.path, &path)?;
        tracing::debug!(block_id = block_id.0, "installed pool extent as block");
        self.open_rw(block_id)
    }

    fn open_block(&self, block_id: BlockId) -> Result<BlockHandle> {
        self.open_rw(block_id)
    }

    fn delete_block(&self, block_id: BlockId) -> Result<()> {
        match fs::remove_file(self.block_path(block_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlockWalError::UnexpectedState(
                format!("block {} vanished before deletion", block_id),
            )),
            Err(e) => Err(BlockWalError::Io(e)),
        }
    }

    fn get_block_id_range(&self) -> Result<Option<(BlockId, BlockId)>> {
        let ids = self.list_blocks()?;
        let (min, max) = match (ids.first(), ids.last()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => return Ok(None),
        };

        // Block ids in use must be contiguous
        if (max.0 - min.0 + 1) as usize != ids.len() {
            return Err(BlockWalError::UnexpectedState(format!(
                "block ids [{}, {}] are not contiguous ({} files)",
                min,
                max,
                ids.len()
            )));
        }

        Ok(Some((min, max)))
    }

    fn block_exists(&self, block_id: BlockId) -> bool {
        self.block_path(block_id).is_file()
    }

    fn truncate_block(&self, block_id: BlockId, physical_len: u64) -> Result<()> {
        let file = Self::open_existing(&self.block_path(block_id), block_id)?;
        // Shrink then regrow: the tail comes back as zeros
        file.set_len(physical_len)?;
        file.set_len(self.physical_block_size)?;
        file.sync_all()?;
        Ok(())
    }

    fn close(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            OWNED_DIRS.lock().retain(|d| d != &self.dir);
        }
    }
}

impl Drop for FsBlockManager {
    fn drop(&mut self) {
        self.close();
    }
}
