//! blockwal Inspection Binary
//!
//! Offline look at a block directory: list blocks, dump headers, scan for the
//! tail without touching any file, or repair the directory with a full
//! recovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use blockwal::block::{BlockManager, BlockReader, FsBlockManager, FsBlockReader, NoSparePool};
use blockwal::block::{BlockHeader, BLOCK_HEADER_SIZE};
use blockwal::record::{LogEntryCodec, LogEntryHeader};
use blockwal::{BlockId, BlockStorage, Config, NoopObserver, Position, Result, StreamKind};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// blockwal inspector
#[derive(Parser, Debug)]
#[command(name = "blockwal-inspect")]
#[command(about = "Inspect a blockwal block directory")]
#[command(version)]
struct Args {
    /// Block directory
    #[arg(short, long, default_value = "./blockwal_data")]
    data_dir: PathBuf,

    /// Logical block size in KB
    #[arg(short = 'b', long, default_value = "65536")]
    block_kb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List block ids on disk
    List,

    /// Dump the header of one block
    Header {
        /// Block id
        block_id: u64,
    },

    /// Report the tail a recovery would find; read-only
    Scan {
        /// Stream id stamped in the block headers
        #[arg(short, long, default_value = "1")]
        stream_id: u64,

        /// Treat the directory as a meta stream
        #[arg(long)]
        meta: bool,
    },

    /// Run a full recovery: cuts torn tails, clears stale headers and
    /// deletes blocks past the tail
    Repair {
        /// Stream id stamped in the block headers
        #[arg(short, long, default_value = "1")]
        stream_id: u64,

        /// Treat the directory as a meta stream
        #[arg(long)]
        meta: bool,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blockwal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("blockwal-inspect v{}", blockwal::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("Inspection failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let logical_block_size = args.block_kb * 1024;
    let physical_block_size = logical_block_size + BLOCK_HEADER_SIZE as u64;

    match args.command {
        Commands::List => {
            let manager = FsBlockManager::open(&args.data_dir, physical_block_size)?;
            let blocks = manager.list_blocks()?;
            match manager.get_block_id_range() {
                Ok(Some((min, max))) => println!("blocks [{}, {}] ({} files)", min, max, blocks.len()),
                Ok(None) => println!("no blocks"),
                Err(e) => println!("block range unusable: {}", e),
            }
            for block_id in blocks {
                println!("{}", manager.block_path(block_id).display());
            }
        }

        Commands::Header { block_id } => {
            let reader = FsBlockReader::new(&args.data_dir);
            let region = reader.read(BlockId(block_id), 0, BLOCK_HEADER_SIZE)?;
            match BlockHeader::decode(&region)? {
                Some(header) => println!("{:#?}", header),
                None => println!("block {} has no header", block_id),
            }
        }

        Commands::Scan { stream_id, meta } => {
            let config = stream_config(&args.data_dir, logical_block_size, stream_id, meta);
            if meta {
                let scan = BlockStorage::scan_meta_tail(config)?;
                match &scan.last {
                    Some(payload) => println!("last meta record: {} bytes", payload.len()),
                    None => println!("no meta record"),
                }
                println!("tail {} blocks {:?}", scan.tail, scan.blocks);
            } else {
                let scan = BlockStorage::scan_tail::<LogEntryCodec>(config)?;
                print_last_entry(scan.last);
                println!("tail {} blocks {:?}", scan.tail, scan.blocks);
            }
        }

        Commands::Repair { stream_id, meta } => {
            let config = stream_config(&args.data_dir, logical_block_size, stream_id, meta);
            // Recovery never switches blocks, so no extents are needed
            let pool = Arc::new(NoSparePool);

            let storage = if meta {
                let (storage, last) = BlockStorage::load_meta(config, NoopObserver, pool)?;
                match last {
                    Some(payload) => println!("last meta record: {} bytes", payload.len()),
                    None => println!("no meta record"),
                }
                storage
            } else {
                let (storage, last) =
                    BlockStorage::load::<LogEntryCodec>(config, NoopObserver, pool)?;
                print_last_entry(last);
                storage
            };

            println!(
                "begin {} end {} blocks {:?}",
                storage.get_begin_position(),
                storage.get_end_position(),
                storage.get_block_id_range()
            );
            storage.shutdown()?;
        }
    }

    Ok(())
}

fn stream_config(data_dir: &Path, logical_block_size: u64, stream_id: u64, meta: bool) -> Config {
    let kind = if meta { StreamKind::Meta } else { StreamKind::Log };
    Config::builder()
        .data_dir(data_dir)
        .stream_id(stream_id)
        .stream_kind(kind)
        .logical_block_size(logical_block_size)
        .pool_capacity(0)
        .build()
}

fn print_last_entry(last: Option<(LogEntryHeader, Position)>) {
    match last {
        Some((header, position)) => println!(
            "last entry at {}: {} bytes, timestamp {}",
            position, header.data_len, header.timestamp
        ),
        None => println!("no entry"),
    }
}
