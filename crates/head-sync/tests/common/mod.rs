//! Common helpers for integration tests.

use chrono::{TimeZone, Utc};
use futures_util::stream;
use head_chain::{Block, BlockHash, ChainContext, ChainSlot, EraHistory, TimeHandle, TimeParams, Tx};
use head_sync::{ChainEvent, ChainSync, ChainSyncError, ChainSyncNotification};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One-second slots from 2023-03-01, reliable up to `horizon`.
pub fn time_handle(horizon: u64) -> Arc<TimeHandle> {
    Arc::new(
        TimeHandle::new(TimeParams {
            system_start: Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
            era_history: EraHistory::single(Duration::from_secs(1), 86_400),
            horizon: ChainSlot(horizon),
            current_slot: ChainSlot(0),
        })
        .unwrap(),
    )
}

pub fn roll_forward(slot: u64, transactions: Vec<Tx>) -> ChainSyncNotification {
    ChainSyncNotification::RollForward(Block {
        slot: ChainSlot(slot),
        hash: BlockHash([slot as u8; 32]),
        transactions,
    })
}

pub fn roll_backward(slot: u64) -> ChainSyncNotification {
    ChainSyncNotification::RollBackward(ChainSlot(slot))
}

/// Runs a fresh ChainSync over `notifications` and returns its outcome and every event.
pub async fn sync_all(
    ctx: ChainContext,
    horizon: u64,
    notifications: Vec<ChainSyncNotification>,
) -> (Result<(), ChainSyncError>, Vec<ChainEvent>) {
    let (sync, mut rx) = ChainSync::new(ctx, time_handle(horizon), 256);
    let result = sync.run(stream::iter(notifications)).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}
