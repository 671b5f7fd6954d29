//! Chain sync handler: turns roll-forward and roll-backward notifications into chain events.
//!
//! For each block the handler converts the slot to wall-clock time, observes the block's
//! transactions against the latest local state, and hands each resulting event to the
//! callback as a continuation. The callback evaluates it against the consumer's own view of
//! the previous state and reports what it recorded; only recorded observations are adopted
//! into the local chain state.

use crate::local_state::LocalChainState;
use head_chain::{
    observe_transactions, Block, ChainSlot, ChainStateAt, Observed, OnChainTx,
    TimeConversionError, TimeHandle, UtcTime,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// What the protocol core learns from the base chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum ChainEvent {
    /// A block with nothing for us; carries its wall-clock time.
    Tick { time: UtcTime, slot: ChainSlot },
    Observation {
        observed: OnChainTx,
        new_chain_state: ChainStateAt,
    },
    Rollback {
        slot: ChainSlot,
        rolled_back_state: ChainStateAt,
    },
}

/// Maps the consumer's previous chain state to the event it should record, if any.
pub type Continuation<'a> = &'a dyn Fn(&ChainStateAt) -> Option<ChainEvent>;

/// Receiver of chain events.
///
/// Implementations run the continuation against their own previous state and return the
/// event they recorded. `None` means nothing was recorded.
pub trait ChainCallback {
    fn call(&mut self, cont: Continuation<'_>) -> Option<ChainEvent>;
}

impl<F> ChainCallback for F
where
    F: FnMut(Continuation<'_>) -> Option<ChainEvent>,
{
    fn call(&mut self, cont: Continuation<'_>) -> Option<ChainEvent> {
        self(cont)
    }
}

/// Source of the current time handle. The handle may be swapped between blocks.
pub trait GetTimeHandle {
    fn time_handle(&self) -> Arc<TimeHandle>;
}

impl GetTimeHandle for Arc<TimeHandle> {
    fn time_handle(&self) -> Arc<TimeHandle> {
        Arc::clone(self)
    }
}

impl GetTimeHandle for watch::Receiver<Arc<TimeHandle>> {
    fn time_handle(&self) -> Arc<TimeHandle> {
        Arc::clone(&self.borrow())
    }
}

#[derive(Debug, Error)]
pub enum ChainSyncError {
    /// The node cannot place the block in time; processing must stop.
    #[error("time conversion failed: {0}")]
    TimeConversion(#[from] TimeConversionError),
}

impl ChainSyncError {
    /// True when the block lies beyond the time handle's safe horizon.
    pub fn is_time_horizon(&self) -> bool {
        matches!(
            self,
            ChainSyncError::TimeConversion(TimeConversionError::PastHorizon { .. })
        )
    }

    pub fn slot(&self) -> Option<ChainSlot> {
        match self {
            ChainSyncError::TimeConversion(e) => e.slot(),
        }
    }
}

pub struct ChainSyncHandler<C, T> {
    callback: C,
    time: T,
    local_state: LocalChainState,
}

impl<C: ChainCallback, T: GetTimeHandle> ChainSyncHandler<C, T> {
    pub fn new(callback: C, time: T, local_state: LocalChainState) -> Self {
        Self {
            callback,
            time,
            local_state,
        }
    }

    pub fn local_state(&self) -> &LocalChainState {
        &self.local_state
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    pub fn callback_mut(&mut self) -> &mut C {
        &mut self.callback
    }

    /// Delivers one `Observation` per recognized transaction, chained in block order. A block
    /// with nothing recognized, or whose first observation the consumer does not record, is
    /// delivered as a single `Tick` so its wall-clock time still reaches the consumer.
    pub fn on_roll_forward(&mut self, block: &Block) -> Result<(), ChainSyncError> {
        let slot = block.slot;
        let time = self
            .time
            .time_handle()
            .slot_to_time(slot)
            .map_err(|e| {
                tracing::error!(%slot, error = %e, "cannot place block in time");
                ChainSyncError::from(e)
            })?;

        let latest = self.local_state.latest();
        let observed = observe_transactions(&latest.head_state, &block.transactions);
        let mut recorded = 0usize;
        let mut previous = latest;
        for Observed {
            tx_id,
            observed,
            head_state,
        } in observed.observations
        {
            let new_chain_state = ChainStateAt {
                head_state,
                recorded_at: slot,
            };
            let kind = observed.kind();
            let event = ChainEvent::Observation {
                observed,
                new_chain_state: new_chain_state.clone(),
            };
            let derived_from = previous.head_state.clone();
            let cont = move |prev: &ChainStateAt| {
                (prev.head_state == derived_from).then(|| event.clone())
            };

            let adopted = matches!(
                self.callback.call(&cont),
                Some(ChainEvent::Observation { .. })
            ) && self.local_state.push_new(new_chain_state.clone());
            if !adopted {
                tracing::debug!(%slot, %tx_id, kind, "observation not adopted");
                break;
            }
            tracing::info!(
                %slot,
                %tx_id,
                kind,
                stage = %new_chain_state.head_state.stage(),
                "observed head transaction"
            );
            recorded += 1;
            previous = new_chain_state;
        }

        if recorded == 0 {
            tracing::trace!(%slot, %time, "tick");
            self.callback.call(&|_| Some(ChainEvent::Tick { time, slot }));
        }
        Ok(())
    }

    /// Rewinds local state to `slot` and always reports the rollback.
    pub fn on_roll_backward(&mut self, slot: ChainSlot) -> Result<(), ChainSyncError> {
        let rolled_back_state = self.local_state.rollback(slot);
        tracing::info!(
            %slot,
            recorded_at = %rolled_back_state.recorded_at,
            stage = %rolled_back_state.head_state.stage(),
            "rolled back"
        );
        let event = ChainEvent::Rollback {
            slot,
            rolled_back_state,
        };
        self.callback.call(&|_| Some(event.clone()));
        Ok(())
    }
}
