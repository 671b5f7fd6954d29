//! Versioned local chain state: the adopted head states, each with the slot it was recorded at.
//!
//! Written only by the chain sync handler. Readers get whole snapshots through a
//! `watch::Receiver`, so a partially applied push or rollback is never visible.

use head_chain::{ChainSlot, ChainStateAt};
use std::sync::Arc;
use tokio::sync::watch;

/// Genesis plus every adopted state, in the order it was adopted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStateHistory {
    genesis: ChainStateAt,
    adopted: Vec<ChainStateAt>,
}

impl ChainStateHistory {
    pub fn new(genesis: ChainStateAt) -> Self {
        Self {
            genesis,
            adopted: Vec::new(),
        }
    }

    pub fn genesis(&self) -> &ChainStateAt {
        &self.genesis
    }

    pub fn latest(&self) -> &ChainStateAt {
        self.adopted.last().unwrap_or(&self.genesis)
    }

    /// Number of entries, genesis included.
    pub fn len(&self) -> usize {
        self.adopted.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Oldest first, starting with genesis.
    pub fn iter(&self) -> impl Iterator<Item = &ChainStateAt> {
        std::iter::once(&self.genesis).chain(self.adopted.iter())
    }

    /// Adopted states stay ordered by slot; a state older than the latest one is refused.
    fn push(&mut self, state: ChainStateAt) -> bool {
        if state.recorded_at < self.latest().recorded_at {
            tracing::warn!(
                recorded_at = %state.recorded_at,
                latest = %self.latest().recorded_at,
                "refusing a state older than the latest one"
            );
            return false;
        }
        self.adopted.push(state);
        true
    }

    /// Drops every state recorded after `slot`. States recorded at `slot` itself stay.
    fn rollback(&mut self, slot: ChainSlot) {
        let keep = self.adopted.partition_point(|s| s.recorded_at <= slot);
        self.adopted.truncate(keep);
    }
}

/// Cloneable handle to the shared history.
#[derive(Debug, Clone)]
pub struct LocalChainState {
    sender: Arc<watch::Sender<ChainStateHistory>>,
}

impl LocalChainState {
    pub fn new(genesis: ChainStateAt) -> Self {
        let (sender, _) = watch::channel(ChainStateHistory::new(genesis));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn latest(&self) -> ChainStateAt {
        self.sender.borrow().latest().clone()
    }

    /// Appends `state` to the history. Returns false, leaving the history untouched, when
    /// `state` was recorded before the latest adopted state.
    pub fn push_new(&self, state: ChainStateAt) -> bool {
        self.sender.send_if_modified(|history| history.push(state))
    }

    /// Rewinds to the newest state recorded at or before `slot` and returns it. Rolling back
    /// past every adopted state yields the genesis state.
    pub fn rollback(&self, slot: ChainSlot) -> ChainStateAt {
        let mut rolled_back = self.genesis();
        self.sender.send_modify(|history| {
            history.rollback(slot);
            rolled_back = history.latest().clone();
        });
        rolled_back
    }

    fn genesis(&self) -> ChainStateAt {
        self.sender.borrow().genesis().clone()
    }

    pub fn history(&self) -> ChainStateHistory {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChainStateHistory> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use head_chain::test_utils::HeadScenario;
    use head_chain::{observe_transactions, HeadState};

    fn states() -> (ChainStateAt, Vec<HeadState>) {
        let sc = HeadScenario::new(2);
        let genesis = ChainStateAt::genesis(sc.context(0));
        let block = observe_transactions(&genesis.head_state, &sc.opening_txs());
        let states = block.observations.into_iter().map(|o| o.head_state).collect();
        (genesis, states)
    }

    fn at(head_state: &HeadState, slot: u64) -> ChainStateAt {
        ChainStateAt {
            head_state: head_state.clone(),
            recorded_at: ChainSlot(slot),
        }
    }

    #[test]
    fn rollback_keeps_states_at_the_target_slot() {
        let (genesis, s) = states();
        let local = LocalChainState::new(genesis);
        local.push_new(at(&s[0], 10));
        local.push_new(at(&s[1], 11));
        local.push_new(at(&s[2], 11));

        assert_eq!(local.rollback(ChainSlot(12)), at(&s[2], 11));
        assert_eq!(local.rollback(ChainSlot(11)), at(&s[2], 11));
        assert_eq!(local.history().len(), 4);
        assert_eq!(local.rollback(ChainSlot(10)), at(&s[0], 10));
        assert_eq!(local.history().len(), 2);
    }

    #[test]
    fn rollback_before_first_state_yields_genesis() {
        let (genesis, s) = states();
        let local = LocalChainState::new(genesis.clone());
        local.push_new(at(&s[0], 10));
        assert_eq!(local.rollback(ChainSlot(9)), genesis);
        assert_eq!(local.rollback(ChainSlot(0)), genesis);
        assert_eq!(local.history().len(), 1);
    }

    #[test]
    fn older_states_are_refused() {
        let (genesis, s) = states();
        let local = LocalChainState::new(genesis.clone());
        let mut rx = local.subscribe();
        assert!(local.push_new(at(&s[0], 10)));
        assert!(local.push_new(at(&s[1], 12)));
        rx.borrow_and_update();

        assert!(!local.push_new(at(&s[2], 11)));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(local.history().len(), 3);
        assert_eq!(local.latest(), at(&s[1], 12));

        // a same-slot state is still accepted
        assert!(local.push_new(at(&s[2], 12)));
        assert_eq!(local.rollback(ChainSlot(11)), at(&s[0], 10));
        assert_eq!(local.rollback(ChainSlot(9)), genesis);
    }

    #[tokio::test]
    async fn subscribers_see_whole_snapshots() {
        let (genesis, s) = states();
        let local = LocalChainState::new(genesis.clone());
        let mut rx = local.subscribe();
        local.push_new(at(&s[0], 10));
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.latest(), &at(&s[0], 10));
        assert_eq!(snapshot.genesis(), &genesis);
        assert_eq!(snapshot.iter().count(), 2);
    }
}
