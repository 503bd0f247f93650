//! Block Module
//!
//! Everything that deals with individual block files.
//!
//! ## Responsibilities
//! - Encode/decode the self-describing block header
//! - Create, open, delete, and enumerate block files (`BlockManager`)
//! - Positional reads from block files (`BlockReader`)
//! - Hand out pre-reserved block-sized extents (`BlockPool`)
//!
//! ## On-disk Layout
//! ```text
//! {data_dir}/
//!   ├── block_00000000000000000007.blk   [header 4 KB][L record bytes]
//!   ├── block_00000000000000000008.blk
//!   └── pool/
//!         └── extent_000003.tmp          [zero-filled, header + L bytes]
//! ```

mod header;
mod manager;
mod pool;
mod reader;

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub use header::{BlockHeader, FLAG_META};
pub use manager::{BlockManager, FsBlockManager};
pub use pool::{BlockPool, FsBlockPool, NoSparePool, PooledExtent};
pub use reader::{BlockReader, FsBlockReader};

use crate::addressing::BlockId;
use crate::error::Result;

/// Bytes reserved for the header at the start of every block file
pub const BLOCK_HEADER_SIZE: usize = 4096;

/// File name of a block: "block_00000000000000000042.blk"
pub(crate) fn block_file_name(block_id: BlockId) -> String {
    format!("block_{:020}.blk", block_id.0)
}

/// Parse a block id from a file name
/// "block_00000000000000000042.blk" → Some(42)
pub(crate) fn parse_block_id(path: &Path) -> Option<BlockId> {
    if path.extension()? != "blk" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    let id_str = name.strip_prefix("block_")?;
    id_str.parse().ok().map(BlockId)
}

/// An open, writable block file
#[derive(Debug)]
pub struct BlockHandle {
    block_id: BlockId,
    path: PathBuf,
    file: File,
}

impl BlockHandle {
    pub(crate) fn new(block_id: BlockId, path: PathBuf, file: File) -> Self {
        Self {
            block_id,
            path,
            file,
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `buf` at a physical offset inside the block file
    pub fn write_at(&mut self, physical_offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(physical_offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Force written bytes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}
