//! Block-level observation: threads the head state through a block's transactions.

use crate::state::{observe_some_tx, HeadState, OnChainTx};
use crate::tx::{Tx, TxId};
use serde::{Deserialize, Serialize};

/// One recognized transaction and the state it led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observed {
    pub tx_id: TxId,
    pub observed: OnChainTx,
    pub head_state: HeadState,
}

/// Result of observing a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedBlock {
    /// State after the last recognized transaction, or the input state if none matched.
    pub head_state: HeadState,
    pub observations: Vec<Observed>,
}

impl ObservedBlock {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Applies `observe_some_tx` to each transaction in block order, feeding every match into
/// the next. Unrecognized transactions are skipped.
pub fn observe_transactions(state: &HeadState, txs: &[Tx]) -> ObservedBlock {
    let mut head_state = state.clone();
    let mut observations = Vec::new();
    for tx in txs {
        if let Some((observed, next)) = observe_some_tx(tx, &head_state) {
            tracing::trace!(
                tx_id = %tx.id,
                kind = observed.kind(),
                stage = %next.stage(),
                "observed head transaction"
            );
            observations.push(Observed {
                tx_id: tx.id,
                observed,
                head_state: next.clone(),
            });
            head_state = next;
        }
    }
    ObservedBlock {
        head_state,
        observations,
    }
}
