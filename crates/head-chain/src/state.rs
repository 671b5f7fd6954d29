//! Head lifecycle stages and the pure transition functions that recognize them.
//!
//! Every recognizer has the shape `(stage, &Tx) -> Option<(next stage, OnChainTx)>`. A
//! transaction that does not match is `None`, never an error: the base chain is shared and
//! most of what we see belongs to someone else. Recognition reads only the transaction and
//! the current stage, so every node observing the same chain reaches the same state.

use crate::slot::ChainSlot;
use crate::time::UtcTime;
use crate::tx::{
    ContestationPeriod, Datum, HeadDatum, HeadId, Party, Redeemer, ScriptRegistry, Tx, TxIn,
    UTxO, UtxoHash,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Local identity and expectations, carried through every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContext {
    pub own_party: Party,
    /// All parties of the head, including `own_party`.
    pub parties: Vec<Party>,
    pub contestation_period: ContestationPeriod,
    pub scripts: ScriptRegistry,
}

impl ChainContext {
    fn expects_parties(&self, declared: &[Party]) -> bool {
        let mut expected = self.parties.clone();
        let mut declared = declared.to_vec();
        expected.sort();
        declared.sort();
        expected == declared
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleState {
    pub ctx: ChainContext,
}

/// A party's recorded commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// The commit output holding the funds until collect or abort.
    pub out_ref: TxIn,
    pub committed: UTxO,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialState {
    pub ctx: ChainContext,
    pub head_id: HeadId,
    pub seed: TxIn,
    pub parties: Vec<Party>,
    pub contestation_period: ContestationPeriod,
    pub head_output: TxIn,
    /// Initial outputs of parties that have not committed yet.
    pub initials: BTreeMap<Party, TxIn>,
    pub commits: BTreeMap<Party, Commitment>,
}

impl InitialState {
    pub fn committed_utxo(&self) -> UTxO {
        self.commits
            .values()
            .fold(UTxO::default(), |acc, c| acc.union(&c.committed))
    }

    pub fn all_committed(&self) -> bool {
        self.initials.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenState {
    pub ctx: ChainContext,
    pub head_id: HeadId,
    pub seed: TxIn,
    pub parties: Vec<Party>,
    pub contestation_period: ContestationPeriod,
    pub head_output: TxIn,
    pub utxo_hash: UtxoHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedState {
    pub ctx: ChainContext,
    pub head_id: HeadId,
    pub seed: TxIn,
    pub parties: Vec<Party>,
    pub contestation_period: ContestationPeriod,
    pub head_output: TxIn,
    pub snapshot_number: u64,
    pub utxo_hash: UtxoHash,
    pub contestation_deadline: UtcTime,
    pub contesters: Vec<Party>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalState {
    pub ctx: ChainContext,
    pub head_id: HeadId,
    pub fanned_out: UTxO,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "state")]
pub enum HeadState {
    Idle(IdleState),
    Initial(InitialState),
    Open(OpenState),
    Closed(ClosedState),
    Final(FinalState),
}

/// Lifecycle stage without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Initial,
    Open,
    Closed,
    Final,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Initial => "initial",
            Stage::Open => "open",
            Stage::Closed => "closed",
            Stage::Final => "final",
        };
        f.write_str(s)
    }
}

impl HeadState {
    pub fn idle(ctx: ChainContext) -> Self {
        HeadState::Idle(IdleState { ctx })
    }

    pub fn stage(&self) -> Stage {
        match self {
            HeadState::Idle(_) => Stage::Idle,
            HeadState::Initial(_) => Stage::Initial,
            HeadState::Open(_) => Stage::Open,
            HeadState::Closed(_) => Stage::Closed,
            HeadState::Final(_) => Stage::Final,
        }
    }

    pub fn context(&self) -> &ChainContext {
        match self {
            HeadState::Idle(s) => &s.ctx,
            HeadState::Initial(s) => &s.ctx,
            HeadState::Open(s) => &s.ctx,
            HeadState::Closed(s) => &s.ctx,
            HeadState::Final(s) => &s.ctx,
        }
    }

    /// `None` while idle.
    pub fn head_id(&self) -> Option<HeadId> {
        match self {
            HeadState::Idle(_) => None,
            HeadState::Initial(s) => Some(s.head_id),
            HeadState::Open(s) => Some(s.head_id),
            HeadState::Closed(s) => Some(s.head_id),
            HeadState::Final(s) => Some(s.head_id),
        }
    }
}

/// Head state together with the slot of the block that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStateAt {
    pub head_state: HeadState,
    pub recorded_at: ChainSlot,
}

impl ChainStateAt {
    /// Idle at slot 0: what every rollback past the first observation resolves to.
    pub fn genesis(ctx: ChainContext) -> Self {
        Self {
            head_state: HeadState::idle(ctx),
            recorded_at: ChainSlot::GENESIS,
        }
    }
}

/// A recognized protocol transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum OnChainTx {
    Init {
        head_id: HeadId,
        seed: TxIn,
        parties: Vec<Party>,
        contestation_period: ContestationPeriod,
    },
    Commit {
        head_id: HeadId,
        party: Party,
        committed: UTxO,
    },
    Abort {
        head_id: HeadId,
    },
    CollectCom {
        head_id: HeadId,
        utxo_hash: UtxoHash,
    },
    Close {
        head_id: HeadId,
        snapshot_number: u64,
        contestation_deadline: UtcTime,
    },
    Contest {
        head_id: HeadId,
        snapshot_number: u64,
        contester: Party,
    },
    Fanout {
        head_id: HeadId,
        fanned_out: UTxO,
    },
}

impl OnChainTx {
    pub fn head_id(&self) -> HeadId {
        match self {
            OnChainTx::Init { head_id, .. }
            | OnChainTx::Commit { head_id, .. }
            | OnChainTx::Abort { head_id }
            | OnChainTx::CollectCom { head_id, .. }
            | OnChainTx::Close { head_id, .. }
            | OnChainTx::Contest { head_id, .. }
            | OnChainTx::Fanout { head_id, .. } => *head_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OnChainTx::Init { .. } => "init",
            OnChainTx::Commit { .. } => "commit",
            OnChainTx::Abort { .. } => "abort",
            OnChainTx::CollectCom { .. } => "collect_com",
            OnChainTx::Close { .. } => "close",
            OnChainTx::Contest { .. } => "contest",
            OnChainTx::Fanout { .. } => "fanout",
        }
    }
}

/// Why a transaction is not an init of the head we expect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotAnInit {
    #[error("no head output with an initial datum")]
    NotAHeadInit,

    #[error("head id does not derive from the seed input")]
    HeadIdMismatch,

    #[error("seed input is not spent")]
    SeedNotSpent,

    #[error("minted tokens do not match the declared parties")]
    WrongMint,

    #[error("own party is not a member of the head")]
    OwnPartyMissing,

    #[error("declared parties differ from the configured parties")]
    PartiesMismatch,

    #[error("contestation period {declared:?} differs from configured {expected:?}")]
    ContestationPeriodMismatch {
        declared: ContestationPeriod,
        expected: ContestationPeriod,
    },

    #[error("missing initial output for party {0}")]
    MissingInitial(Party),
}

/// Init recognition with the reason for a mismatch.
pub fn match_init(ctx: &ChainContext, tx: &Tx) -> Result<(InitialState, OnChainTx), NotAnInit> {
    let (head_output, head_out, head_id, seed, parties, contestation_period) = tx
        .outputs_at(ctx.scripts.head)
        .find_map(|(out_ref, out)| match &out.datum {
            Some(Datum::Head(HeadDatum::Initial {
                head_id,
                seed,
                parties,
                contestation_period,
            })) => Some((out_ref, out, *head_id, *seed, parties, *contestation_period)),
            _ => None,
        })
        .ok_or(NotAnInit::NotAHeadInit)?;

    if head_id != HeadId::from_seed(&seed) {
        return Err(NotAnInit::HeadIdMismatch);
    }
    if !tx.spends(&seed) {
        return Err(NotAnInit::SeedNotSpent);
    }

    let state_token = head_id.state_token();
    let policy = head_id.policy_id();
    let minted_under_policy = tx.mint.keys().filter(|a| a.policy == policy).count();
    let tokens_ok = head_out.value.quantity_of(&state_token) == 1
        && tx.minted(&state_token) == 1
        && parties
            .iter()
            .all(|p| tx.minted(&head_id.participation_token(p)) == 1)
        && minted_under_policy == parties.len() + 1;
    if !tokens_ok {
        return Err(NotAnInit::WrongMint);
    }

    if !parties.contains(&ctx.own_party) {
        return Err(NotAnInit::OwnPartyMissing);
    }
    if !ctx.expects_parties(parties) {
        return Err(NotAnInit::PartiesMismatch);
    }
    if contestation_period != ctx.contestation_period {
        return Err(NotAnInit::ContestationPeriodMismatch {
            declared: contestation_period,
            expected: ctx.contestation_period,
        });
    }

    let mut initials = BTreeMap::new();
    for party in parties {
        let token = head_id.participation_token(party);
        let out_ref = tx
            .outputs_at(ctx.scripts.initial)
            .find(|(_, out)| {
                out.datum == Some(Datum::Initial { head_id }) && out.value.quantity_of(&token) == 1
            })
            .map(|(out_ref, _)| out_ref)
            .ok_or(NotAnInit::MissingInitial(*party))?;
        initials.insert(*party, out_ref);
    }

    let next = InitialState {
        ctx: ctx.clone(),
        head_id,
        seed,
        parties: parties.clone(),
        contestation_period,
        head_output,
        initials,
        commits: BTreeMap::new(),
    };
    let observed = OnChainTx::Init {
        head_id,
        seed,
        parties: parties.clone(),
        contestation_period,
    };
    Ok((next, observed))
}

pub fn observe_init(st: &IdleState, tx: &Tx) -> Option<(InitialState, OnChainTx)> {
    match match_init(&st.ctx, tx) {
        Ok(found) => Some(found),
        Err(NotAnInit::NotAHeadInit) => None,
        Err(reason) => {
            tracing::debug!(tx_id = %tx.id, %reason, "ignoring head init not meant for us");
            None
        }
    }
}

pub fn observe_commit(st: &InitialState, tx: &Tx) -> Option<(InitialState, OnChainTx)> {
    let (party, initial) = st
        .initials
        .iter()
        .find(|(_, out_ref)| tx.spends(out_ref))
        .map(|(party, out_ref)| (*party, *out_ref))?;
    if st.commits.contains_key(&party) {
        return None;
    }
    let listed: BTreeSet<TxIn> = match tx.redeemer_for(&initial)? {
        Redeemer::Commit { committed } => committed.iter().copied().collect(),
        _ => return None,
    };

    let token = st.head_id.participation_token(&party);
    let (out_ref, committed) = tx
        .outputs_at(st.ctx.scripts.commit)
        .find_map(|(out_ref, out)| match &out.datum {
            Some(Datum::Commit {
                head_id,
                party: p,
                committed,
            }) if *head_id == st.head_id
                && *p == party
                && out.value.quantity_of(&token) == 1 =>
            {
                Some((out_ref, committed))
            }
            _ => None,
        })?;

    let held: BTreeSet<TxIn> = committed.refs().copied().collect();
    if held != listed || !held.iter().all(|r| tx.spends(r)) {
        return None;
    }

    let mut next = st.clone();
    next.initials.remove(&party);
    next.commits.insert(
        party,
        Commitment {
            out_ref,
            committed: committed.clone(),
        },
    );
    let observed = OnChainTx::Commit {
        head_id: st.head_id,
        party,
        committed: committed.clone(),
    };
    Some((next, observed))
}

/// The continuing head output of `tx`: locked by the head script, holding the state token.
fn next_head_datum<'a>(
    tx: &'a Tx,
    ctx: &ChainContext,
    head_id: HeadId,
) -> Option<(TxIn, &'a HeadDatum)> {
    let state_token = head_id.state_token();
    tx.outputs_at(ctx.scripts.head)
        .find_map(|(out_ref, out)| match &out.datum {
            Some(Datum::Head(datum)) if out.value.quantity_of(&state_token) == 1 => {
                Some((out_ref, datum))
            }
            _ => None,
        })
}

pub fn observe_collect_com(st: &InitialState, tx: &Tx) -> Option<(OpenState, OnChainTx)> {
    if tx.redeemer_for(&st.head_output) != Some(&Redeemer::CollectCom) {
        return None;
    }
    if !st.all_committed() || !st.commits.values().all(|c| tx.spends(&c.out_ref)) {
        return None;
    }
    let (head_output, datum) = next_head_datum(tx, &st.ctx, st.head_id)?;
    let utxo_hash = match datum {
        HeadDatum::Open {
            head_id,
            parties,
            contestation_period,
            utxo_hash,
        } if *head_id == st.head_id
            && *parties == st.parties
            && *contestation_period == st.contestation_period =>
        {
            *utxo_hash
        }
        _ => return None,
    };
    if utxo_hash != UtxoHash::of(&st.committed_utxo()) {
        return None;
    }

    let next = OpenState {
        ctx: st.ctx.clone(),
        head_id: st.head_id,
        seed: st.seed,
        parties: st.parties.clone(),
        contestation_period: st.contestation_period,
        head_output,
        utxo_hash,
    };
    let observed = OnChainTx::CollectCom {
        head_id: st.head_id,
        utxo_hash,
    };
    Some((next, observed))
}

/// Abort returns the head to idle; the same context may see a fresh init later.
pub fn observe_abort(st: &InitialState, tx: &Tx) -> Option<(IdleState, OnChainTx)> {
    if tx.redeemer_for(&st.head_output) != Some(&Redeemer::Abort) {
        return None;
    }
    if tx.minted(&st.head_id.state_token()) != -1 {
        return None;
    }
    Some((
        IdleState {
            ctx: st.ctx.clone(),
        },
        OnChainTx::Abort {
            head_id: st.head_id,
        },
    ))
}

pub fn observe_close(st: &OpenState, tx: &Tx) -> Option<(ClosedState, OnChainTx)> {
    if tx.redeemer_for(&st.head_output) != Some(&Redeemer::Close) {
        return None;
    }
    let (head_output, datum) = next_head_datum(tx, &st.ctx, st.head_id)?;
    let HeadDatum::Closed {
        head_id,
        parties,
        contestation_period,
        snapshot_number,
        utxo_hash,
        contestation_deadline,
        contesters,
    } = datum
    else {
        return None;
    };
    if *head_id != st.head_id
        || *parties != st.parties
        || *contestation_period != st.contestation_period
        || !contesters.is_empty()
    {
        return None;
    }
    // Closing with the initial snapshot must carry the collected UTxO.
    if *snapshot_number == 0 && *utxo_hash != st.utxo_hash {
        return None;
    }

    let next = ClosedState {
        ctx: st.ctx.clone(),
        head_id: st.head_id,
        seed: st.seed,
        parties: st.parties.clone(),
        contestation_period: st.contestation_period,
        head_output,
        snapshot_number: *snapshot_number,
        utxo_hash: *utxo_hash,
        contestation_deadline: *contestation_deadline,
        contesters: Vec::new(),
    };
    let observed = OnChainTx::Close {
        head_id: st.head_id,
        snapshot_number: *snapshot_number,
        contestation_deadline: *contestation_deadline,
    };
    Some((next, observed))
}

pub fn observe_contest(st: &ClosedState, tx: &Tx) -> Option<(ClosedState, OnChainTx)> {
    if tx.redeemer_for(&st.head_output) != Some(&Redeemer::Contest) {
        return None;
    }
    let (head_output, datum) = next_head_datum(tx, &st.ctx, st.head_id)?;
    let HeadDatum::Closed {
        head_id,
        parties,
        contestation_period,
        snapshot_number,
        utxo_hash,
        contestation_deadline,
        contesters,
    } = datum
    else {
        return None;
    };
    if *head_id != st.head_id
        || *parties != st.parties
        || *contestation_period != st.contestation_period
        || *snapshot_number <= st.snapshot_number
        || *contestation_deadline < st.contestation_deadline
    {
        return None;
    }
    // Exactly one new contester, appended to the previous ones.
    let (contester, previous) = contesters.split_last()?;
    if previous != st.contesters.as_slice()
        || !st.parties.contains(contester)
        || st.contesters.contains(contester)
    {
        return None;
    }

    let next = ClosedState {
        head_output,
        snapshot_number: *snapshot_number,
        utxo_hash: *utxo_hash,
        contestation_deadline: *contestation_deadline,
        contesters: contesters.clone(),
        ..st.clone()
    };
    let observed = OnChainTx::Contest {
        head_id: st.head_id,
        snapshot_number: *snapshot_number,
        contester: *contester,
    };
    Some((next, observed))
}

pub fn observe_fanout(st: &ClosedState, tx: &Tx) -> Option<(FinalState, OnChainTx)> {
    let num_outputs = match tx.redeemer_for(&st.head_output)? {
        Redeemer::Fanout { num_outputs } => usize::try_from(*num_outputs).ok()?,
        _ => return None,
    };
    if tx.minted(&st.head_id.state_token()) != -1 {
        return None;
    }
    let outputs = tx.outputs.get(..num_outputs)?;
    if UtxoHash::of_outputs(outputs) != st.utxo_hash {
        return None;
    }

    let fanned_out: UTxO = tx
        .produced()
        .take(num_outputs)
        .map(|(out_ref, out)| (out_ref, out.clone()))
        .collect();
    let next = FinalState {
        ctx: st.ctx.clone(),
        head_id: st.head_id,
        fanned_out: fanned_out.clone(),
    };
    let observed = OnChainTx::Fanout {
        head_id: st.head_id,
        fanned_out,
    };
    Some((next, observed))
}

/// Tries the transitions of the current stage in a fixed order.
pub fn observe_some_tx(tx: &Tx, state: &HeadState) -> Option<(OnChainTx, HeadState)> {
    match state {
        HeadState::Idle(st) => {
            observe_init(st, tx).map(|(next, observed)| (observed, HeadState::Initial(next)))
        }
        HeadState::Initial(st) => observe_commit(st, tx)
            .map(|(next, observed)| (observed, HeadState::Initial(next)))
            .or_else(|| {
                observe_collect_com(st, tx)
                    .map(|(next, observed)| (observed, HeadState::Open(next)))
            })
            .or_else(|| {
                observe_abort(st, tx).map(|(next, observed)| (observed, HeadState::Idle(next)))
            }),
        HeadState::Open(st) => {
            observe_close(st, tx).map(|(next, observed)| (observed, HeadState::Closed(next)))
        }
        HeadState::Closed(st) => observe_contest(st, tx)
            .map(|(next, observed)| (observed, HeadState::Closed(next)))
            .or_else(|| {
                observe_fanout(st, tx).map(|(next, observed)| (observed, HeadState::Final(next)))
            }),
        HeadState::Final(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{foreign_tx, user_utxo, HeadScenario};
    use crate::tx::{Address, Input, TxOut, Value};
    use chrono::{TimeZone, Utc};

    fn deadline() -> UtcTime {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn initial(sc: &HeadScenario) -> InitialState {
        let idle = IdleState {
            ctx: sc.context(0),
        };
        observe_init(&idle, &sc.init_tx()).unwrap().0
    }

    fn committed_all(sc: &HeadScenario) -> InitialState {
        let mut st = initial(sc);
        for (i, party) in sc.parties.clone().iter().enumerate() {
            let funds = user_utxo(&format!("funds-{i}"), party, 10 + i as u64);
            let tx = sc.commit_tx(&st, party, funds);
            st = observe_commit(&st, &tx).unwrap().0;
        }
        st
    }

    fn open(sc: &HeadScenario) -> OpenState {
        let st = committed_all(sc);
        observe_collect_com(&st, &sc.collect_com_tx(&st)).unwrap().0
    }

    fn closed(sc: &HeadScenario) -> ClosedState {
        let st = open(sc);
        let tx = sc.close_tx(&st, 0, st.utxo_hash, deadline());
        observe_close(&st, &tx).unwrap().0
    }

    #[test]
    fn init_is_recognized_by_every_party() {
        let sc = HeadScenario::new(3);
        let tx = sc.init_tx();
        for i in 0..3 {
            let idle = IdleState {
                ctx: sc.context(i),
            };
            let (st, observed) = observe_init(&idle, &tx).unwrap();
            assert_eq!(st.head_id, sc.head_id());
            assert_eq!(st.initials.len(), 3);
            assert!(st.commits.is_empty());
            assert!(matches!(observed, OnChainTx::Init { head_id, .. } if head_id == sc.head_id()));
        }
    }

    #[test]
    fn init_for_other_parties_is_ignored() {
        let sc = HeadScenario::new(3);
        let outsider = HeadScenario::new(2);
        let mut ctx = outsider.context(0);
        ctx.own_party = Party([0xee; 32]);
        assert_eq!(
            match_init(&ctx, &sc.init_tx()).unwrap_err(),
            NotAnInit::OwnPartyMissing
        );

        let mut ctx = sc.context(0);
        ctx.parties.pop();
        assert_eq!(
            match_init(&ctx, &sc.init_tx()).unwrap_err(),
            NotAnInit::PartiesMismatch
        );

        let mut ctx = sc.context(0);
        ctx.contestation_period = ContestationPeriod(1);
        assert!(matches!(
            match_init(&ctx, &sc.init_tx()).unwrap_err(),
            NotAnInit::ContestationPeriodMismatch { .. }
        ));
    }

    #[test]
    fn init_without_seed_spend_is_rejected() {
        let sc = HeadScenario::new(2);
        let mut tx = sc.init_tx();
        tx.inputs.clear();
        assert_eq!(
            match_init(&sc.context(0), &tx).unwrap_err(),
            NotAnInit::SeedNotSpent
        );
    }

    #[test]
    fn init_with_extra_minted_token_is_rejected() {
        let sc = HeadScenario::new(2);
        let mut tx = sc.init_tx();
        tx.mint
            .insert(sc.head_id().participation_token(&Party([0x77; 32])), 1);
        assert_eq!(
            match_init(&sc.context(0), &tx).unwrap_err(),
            NotAnInit::WrongMint
        );
    }

    #[test]
    fn commit_records_funds_and_consumes_initial() {
        let sc = HeadScenario::new(3);
        let st = initial(&sc);
        let party = sc.parties[1];
        let funds = user_utxo("b", &party, 42);
        let tx = sc.commit_tx(&st, &party, funds.clone());
        let (next, observed) = observe_commit(&st, &tx).unwrap();
        assert_eq!(next.commits[&party].committed, funds);
        assert!(!next.initials.contains_key(&party));
        assert_eq!(
            observed,
            OnChainTx::Commit {
                head_id: sc.head_id(),
                party,
                committed: funds,
            }
        );
    }

    #[test]
    fn duplicate_commit_is_not_reapplied() {
        let sc = HeadScenario::new(2);
        let st = initial(&sc);
        let party = sc.parties[0];
        let tx = sc.commit_tx(&st, &party, user_utxo("a", &party, 1));
        let (next, _) = observe_commit(&st, &tx).unwrap();
        assert_eq!(observe_commit(&next, &tx), None);
    }

    #[test]
    fn commit_with_unspent_committed_ref_is_rejected() {
        let sc = HeadScenario::new(2);
        let st = initial(&sc);
        let party = sc.parties[0];
        let funds = user_utxo("a", &party, 1);
        let mut tx = sc.commit_tx(&st, &party, funds.clone());
        let spent = *funds.refs().next().unwrap();
        tx.inputs.retain(|i| i.out_ref != spent);
        assert_eq!(observe_commit(&st, &tx), None);
    }

    #[test]
    fn collect_requires_every_commit() {
        let sc = HeadScenario::new(2);
        let st = initial(&sc);
        let party = sc.parties[0];
        let tx = sc.commit_tx(&st, &party, user_utxo("a", &party, 1));
        let (partial, _) = observe_commit(&st, &tx).unwrap();
        assert_eq!(observe_collect_com(&partial, &sc.collect_com_tx(&partial)), None);

        let full = committed_all(&sc);
        let (open, observed) = observe_collect_com(&full, &sc.collect_com_tx(&full)).unwrap();
        assert_eq!(open.utxo_hash, UtxoHash::of(&full.committed_utxo()));
        assert!(matches!(observed, OnChainTx::CollectCom { .. }));
    }

    #[test]
    fn abort_returns_to_idle() {
        let sc = HeadScenario::new(2);
        let st = initial(&sc);
        let (idle, observed) = observe_abort(&st, &sc.abort_tx(&st)).unwrap();
        assert_eq!(idle.ctx, sc.context(0));
        assert_eq!(
            observed,
            OnChainTx::Abort {
                head_id: sc.head_id()
            }
        );
    }

    #[test]
    fn close_with_initial_snapshot_must_carry_open_utxo() {
        let sc = HeadScenario::new(2);
        let st = open(&sc);
        let bogus = UtxoHash([9; 32]);
        assert_eq!(observe_close(&st, &sc.close_tx(&st, 0, bogus, deadline())), None);
        let (closed, _) = observe_close(&st, &sc.close_tx(&st, 3, bogus, deadline())).unwrap();
        assert_eq!(closed.snapshot_number, 3);
        assert_eq!(closed.contestation_deadline, deadline());
    }

    #[test]
    fn contest_needs_newer_snapshot_and_new_contester() {
        let sc = HeadScenario::new(3);
        let st = closed(&sc);
        let party = sc.parties[2];
        let stale = sc.contest_tx(&st, &party, 0, st.utxo_hash);
        assert_eq!(observe_contest(&st, &stale), None);

        let tx = sc.contest_tx(&st, &party, 2, UtxoHash([2; 32]));
        let (next, observed) = observe_contest(&st, &tx).unwrap();
        assert_eq!(next.contesters, vec![party]);
        assert_eq!(next.snapshot_number, 2);
        assert!(matches!(observed, OnChainTx::Contest { contester, .. } if contester == party));

        let again = sc.contest_tx(&next, &party, 3, UtxoHash([3; 32]));
        assert_eq!(observe_contest(&next, &again), None);
    }

    #[test]
    fn fanout_must_distribute_the_closed_utxo() {
        let sc = HeadScenario::new(2);
        let committed = committed_all(&sc).committed_utxo();
        let st = closed(&sc);
        let (fin, observed) = observe_fanout(&st, &sc.fanout_tx(&st, &committed)).unwrap();
        assert_eq!(fin.fanned_out.len(), committed.len());
        assert!(matches!(observed, OnChainTx::Fanout { .. }));

        let other = user_utxo("elsewhere", &sc.parties[0], 99);
        assert_eq!(observe_fanout(&st, &sc.fanout_tx(&st, &other)), None);
    }

    #[test]
    fn dispatcher_follows_the_lifecycle() {
        let sc = HeadScenario::new(2);
        let mut state = HeadState::idle(sc.context(0));
        let mut kinds = Vec::new();
        for tx in sc.lifecycle_txs(deadline()) {
            let (observed, next) = observe_some_tx(&tx, &state).unwrap();
            kinds.push(observed.kind());
            state = next;
        }
        assert_eq!(
            kinds,
            ["init", "commit", "commit", "collect_com", "close", "contest", "fanout"]
        );
        assert_eq!(state.stage(), Stage::Final);
        assert_eq!(observe_some_tx(&sc.init_tx(), &state), None);
    }

    #[test]
    fn foreign_transactions_do_not_match_any_stage() {
        let sc = HeadScenario::new(2);
        let states = [
            HeadState::idle(sc.context(0)),
            HeadState::Initial(initial(&sc)),
            HeadState::Open(open(&sc)),
            HeadState::Closed(closed(&sc)),
        ];
        for state in &states {
            assert_eq!(observe_some_tx(&foreign_tx("payment"), state), None);
        }
    }

    #[test]
    fn spending_head_output_without_redeemer_is_foreign() {
        let sc = HeadScenario::new(2);
        let st = open(&sc);
        let tx = Tx {
            id: crate::test_utils::tx_id("steal"),
            inputs: vec![Input::plain(st.head_output)],
            outputs: vec![TxOut {
                address: Address::Key(sc.parties[0].key_hash()),
                value: Value::lovelace(1),
                datum: None,
            }],
            mint: BTreeMap::new(),
        };
        assert_eq!(observe_some_tx(&tx, &HeadState::Open(st)), None);
    }
}
