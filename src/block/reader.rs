//! Block Reader
//!
//! Positional reads from block files.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::addressing::BlockId;
use crate::error::{BlockWalError, Result};

use super::block_file_name;

/// Raw byte-range reads from a block
pub trait BlockReader: Send + Sync {
    /// Read `len` bytes starting at `physical_offset` of block `block_id`
    fn read(&self, block_id: BlockId, physical_offset: u64, len: usize) -> Result<Bytes>;
}

/// Reader opening block files from a directory
///
/// Every call opens its own file handle, so concurrent reads never share a
/// seek position.
pub struct FsBlockReader {
    dir: PathBuf,
}

impl FsBlockReader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl BlockReader for FsBlockReader {
    fn read(&self, block_id: BlockId, physical_offset: u64, len: usize) -> Result<Bytes> {
        let path = self.dir.join(block_file_name(block_id));
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BlockWalError::UnexpectedState(format!(
                "block {} is missing where data should exist",
                block_id
            )),
            _ => BlockWalError::Io(e),
        })?;

        file.seek(SeekFrom::Start(physical_offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => BlockWalError::UnexpectedState(format!(
                "block {} is shorter than offset {} + {}",
                block_id, physical_offset, len
            )),
            _ => BlockWalError::Io(e),
        })?;

        Ok(Bytes::from(buf))
    }
}
