//! ChainSync: drives a [ChainSyncHandler] from a stream of chain follower notifications and
//! forwards the recorded events to the protocol core over a bounded channel.

use crate::handler::{
    ChainCallback, ChainEvent, ChainSyncError, ChainSyncHandler, Continuation, GetTimeHandle,
};
use crate::local_state::LocalChainState;
use futures_util::{pin_mut, Stream, StreamExt};
use head_chain::{Block, BlockHash, ChainContext, ChainSlot, ChainStateAt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What the chain follower reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSyncNotification {
    RollForward(Block),
    /// A block whose transactions are still hex-encoded CBOR.
    RollForwardRaw {
        slot: ChainSlot,
        hash: BlockHash,
        txs: Vec<String>,
    },
    RollBackward(ChainSlot),
}

/// Callback that records every event against the shared local chain state.
#[derive(Debug)]
pub struct EventBuffer {
    local_state: LocalChainState,
    events: Vec<ChainEvent>,
}

impl EventBuffer {
    pub fn new(local_state: LocalChainState) -> Self {
        Self {
            local_state,
            events: Vec::new(),
        }
    }

    /// Recorded events since the last call, oldest first.
    pub fn take(&mut self) -> Vec<ChainEvent> {
        std::mem::take(&mut self.events)
    }
}

impl ChainCallback for EventBuffer {
    fn call(&mut self, cont: Continuation<'_>) -> Option<ChainEvent> {
        let event = cont(&self.local_state.latest())?;
        self.events.push(event.clone());
        Some(event)
    }
}

fn decode_raw(slot: ChainSlot, hash: BlockHash, txs: &[String]) -> Block {
    let raw: Vec<Vec<u8>> = txs
        .iter()
        .enumerate()
        .filter_map(|(index, tx)| {
            hex::decode(tx)
                .map_err(|e| tracing::debug!(%slot, index, reason = %e, "transaction is not hex"))
                .ok()
        })
        .collect();
    Block::decode(slot, hash, &raw)
}

pub struct ChainSync<T> {
    handler: ChainSyncHandler<EventBuffer, T>,
    events: mpsc::Sender<ChainEvent>,
}

impl<T: GetTimeHandle> ChainSync<T> {
    /// Starts from the genesis state of `ctx`. At most `event_buffer` events wait for the
    /// consumer before notification processing pauses.
    pub fn new(
        ctx: ChainContext,
        time: T,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ChainEvent>) {
        let local_state = LocalChainState::new(ChainStateAt::genesis(ctx));
        let (events, receiver) = mpsc::channel(event_buffer.max(1));
        let buffer = EventBuffer::new(local_state.clone());
        let handler = ChainSyncHandler::new(buffer, time, local_state);
        (Self { handler, events }, receiver)
    }

    pub fn chain_state(&self) -> LocalChainState {
        self.handler.local_state().clone()
    }

    fn handle(&mut self, notification: ChainSyncNotification) -> Result<(), ChainSyncError> {
        match notification {
            ChainSyncNotification::RollForward(block) => self.handler.on_roll_forward(&block),
            ChainSyncNotification::RollForwardRaw { slot, hash, txs } => {
                self.handler.on_roll_forward(&decode_raw(slot, hash, &txs))
            }
            ChainSyncNotification::RollBackward(slot) => self.handler.on_roll_backward(slot),
        }
    }

    /// Processes notifications one at a time until the stream ends, the consumer goes away,
    /// or a block cannot be placed in time.
    pub async fn run<S>(mut self, notifications: S) -> Result<(), ChainSyncError>
    where
        S: Stream<Item = ChainSyncNotification>,
    {
        pin_mut!(notifications);
        while let Some(notification) = notifications.next().await {
            self.handle(notification)?;
            for event in self.handler.callback_mut().take() {
                if self.events.send(event).await.is_err() {
                    tracing::info!("event consumer closed; stopping chain sync");
                    return Ok(());
                }
            }
        }
        tracing::info!("chain follower stream ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_use_snake_case_tags() {
        let n: ChainSyncNotification = serde_json::from_str(r#"{"roll_backward": 11}"#).unwrap();
        assert_eq!(n, ChainSyncNotification::RollBackward(ChainSlot(11)));
    }

    #[test]
    fn raw_blocks_skip_bad_hex() {
        let block = decode_raw(
            ChainSlot(4),
            BlockHash([1; 32]),
            &["zz".to_string(), "ff00".to_string()],
        );
        assert_eq!(block.slot, ChainSlot(4));
        assert!(block.transactions.is_empty());
    }
}
