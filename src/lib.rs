//! # blockwal
//!
//! A block-segmented, append-only log storage engine with:
//! - One logical byte stream per engine, addressed by position
//! - Fixed-size block files carrying a self-describing header
//! - Crash recovery that trims torn tail writes
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Consensus layer / log writer                 │
//! │        append · read · truncate · reclaim · recover          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     BlockStorage                             │
//! │      (tail lock · deletion lock · writer lock)               │
//! └──────┬──────────────────┬───────────────────┬───────────────┘
//!        │                  │                   │
//!        ▼                  ▼                   ▼
//!   ┌──────────┐     ┌────────────┐      ┌────────────┐
//!   │ Block    │     │ Block      │      │ Block      │
//!   │ Manager  │◄────┤ Pool       │      │ Reader     │
//!   │ (files)  │     │ (extents)  │      │ (pread)    │
//!   └──────────┘     └────────────┘      └────────────┘
//!                                               ▲
//!                     ┌─────────────────┐       │
//!                     │ RecordIterator  ├───────┘
//!                     │ (RecordCodec)   │  recovery / codec reads
//!                     └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod addressing;
pub mod block;
pub mod record;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BlockWalError, Result};
pub use config::{Config, StreamKind, SyncStrategy};
pub use addressing::{BlockId, BlockLayout, Position, StreamId};
pub use engine::{BlockStorage, BlockSwitchEvent, BlockSwitchObserver, NoopObserver, TailScan};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blockwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
