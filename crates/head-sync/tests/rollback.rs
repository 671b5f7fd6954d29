//! Rollback behaviour over a full head lifecycle, at every possible rollback point.

mod common;

use common::{init_tracing, roll_backward, roll_forward, sync_all, time_handle};
use head_chain::test_utils::HeadScenario;
use head_chain::{ChainSlot, ChainStateAt, HeadState};
use head_sync::{ChainEvent, ChainSyncNotification};
use proptest::prelude::*;

const FIRST_SLOT: u64 = 20;

/// One block per lifecycle transaction, starting at `FIRST_SLOT`.
fn lifecycle_blocks(sc: &HeadScenario) -> Vec<ChainSyncNotification> {
    let deadline = time_handle(1_000).slot_to_time(ChainSlot(500)).unwrap();
    sc.lifecycle_txs(deadline)
        .into_iter()
        .zip(FIRST_SLOT..)
        .map(|(tx, slot)| roll_forward(slot, vec![tx]))
        .collect()
}

fn recorded_state(event: &ChainEvent) -> &ChainStateAt {
    match event {
        ChainEvent::Observation {
            new_chain_state, ..
        } => new_chain_state,
        other => panic!("expected an observation, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_after_any_rollback_matches_the_first_run() {
    init_tracing();
    let sc = HeadScenario::new(3);
    let forward = lifecycle_blocks(&sc);
    let tip = FIRST_SLOT + forward.len() as u64 - 1;

    let (result, original) = sync_all(sc.context(1), 1_000, forward.clone()).await;
    result.unwrap();
    assert_eq!(original.len(), forward.len());

    for target in 0..=tip + 3 {
        let kept = (target + 1).saturating_sub(FIRST_SLOT).min(forward.len() as u64) as usize;
        let mut notifications = forward.clone();
        notifications.push(roll_backward(target));
        notifications.extend(forward[kept..].iter().cloned());

        let (result, events) = sync_all(sc.context(1), 1_000, notifications).await;
        result.unwrap();
        assert_eq!(events[..forward.len()], original[..], "target {target}");

        let ChainEvent::Rollback {
            slot,
            rolled_back_state,
        } = &events[forward.len()]
        else {
            panic!("expected rollback at target {target}, got {:?}", events[forward.len()]);
        };
        assert_eq!(*slot, ChainSlot(target));
        let expected = match kept {
            0 => ChainStateAt::genesis(sc.context(1)),
            n => recorded_state(&original[n - 1]).clone(),
        };
        assert_eq!(rolled_back_state, &expected, "target {target}");
        assert_eq!(events[forward.len() + 1..], original[kept..], "target {target}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn rollback_to_zero_always_reports_idle(prefix in 0usize..=8, party in 0usize..3) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let sc = HeadScenario::new(3);
        let mut notifications: Vec<_> = lifecycle_blocks(&sc).into_iter().take(prefix).collect();
        notifications.push(roll_backward(0));

        let (result, events) = rt.block_on(sync_all(sc.context(party), 1_000, notifications));
        prop_assert!(result.is_ok());
        prop_assert_eq!(events.len(), prefix + 1);
        let is_genesis_rollback = matches!(
            events.last(),
            Some(ChainEvent::Rollback { slot, rolled_back_state })
                if *slot == ChainSlot(0)
                    && rolled_back_state.recorded_at == ChainSlot(0)
                    && rolled_back_state.head_state == HeadState::idle(sc.context(party))
        );
        prop_assert!(is_genesis_rollback);
    }
}
