//! Block switch notifications
//!
//! Upper layers (caches keyed by block id, metrics) learn about a new active
//! block through a `BlockSwitchObserver`. The engine calls it synchronously,
//! after the new block exists and before the tail moves into it.

use crate::addressing::BlockId;

/// Emitted once per block switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSwitchEvent {
    /// Block that was active before, None for the very first block
    pub previous: Option<BlockId>,
    /// Block that is active now
    pub current: BlockId,
}

/// Receiver of block switch events
pub trait BlockSwitchObserver: Send + Sync {
    fn on_block_switch(&self, event: &BlockSwitchEvent);
}

impl<F> BlockSwitchObserver for F
where
    F: Fn(&BlockSwitchEvent) + Send + Sync,
{
    fn on_block_switch(&self, event: &BlockSwitchEvent) {
        self(event)
    }
}

/// Observer that ignores every event
pub struct NoopObserver;

impl BlockSwitchObserver for NoopObserver {
    fn on_block_switch(&self, _event: &BlockSwitchEvent) {}
}
