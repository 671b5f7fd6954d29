//! Builders for well-formed protocol transactions.
//!
//! Available to this crate's tests and, through the `test-utils` feature, to downstream
//! crates that need a scripted head on a fake chain.

use crate::state::{
    observe_close, observe_collect_com, observe_commit, observe_contest, observe_init,
    ChainContext, ClosedState, IdleState, InitialState, OpenState,
};
use crate::time::UtcTime;
use crate::tx::{
    Address, ContestationPeriod, Datum, HeadDatum, HeadId, Input, Party, Redeemer,
    ScriptRegistry, Tx, TxId, TxIn, TxOut, UTxO, UtxoHash, Value,
};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;

const MIN_ADA: u64 = 2_000_000;

/// Deterministic transaction id derived from a label.
pub fn tx_id(label: &str) -> TxId {
    TxId(Sha3_256::digest(label.as_bytes()).into())
}

/// A single output paying `lovelace` to `owner`.
pub fn user_utxo(label: &str, owner: &Party, lovelace: u64) -> UTxO {
    UTxO::singleton(
        TxIn::new(tx_id(label), 0),
        TxOut {
            address: Address::Key(owner.key_hash()),
            value: Value::lovelace(lovelace),
            datum: None,
        },
    )
}

/// An ordinary payment unrelated to any head.
pub fn foreign_tx(label: &str) -> Tx {
    Tx {
        id: tx_id(&format!("foreign-{label}")),
        inputs: vec![Input::plain(TxIn::new(tx_id(label), 0))],
        outputs: vec![TxOut {
            address: Address::Key(Party(tx_id(label).0).key_hash()),
            value: Value::lovelace(1_500_000),
            datum: Some(Datum::Opaque(label.as_bytes().to_vec())),
        }],
        mint: BTreeMap::new(),
    }
}

#[derive(Debug, Clone)]
pub struct HeadScenario {
    pub parties: Vec<Party>,
    pub contestation_period: ContestationPeriod,
    pub scripts: ScriptRegistry,
    pub seed: TxIn,
}

impl HeadScenario {
    pub fn new(num_parties: usize) -> Self {
        let parties = (0..num_parties)
            .map(|i| Party(Sha3_256::digest(format!("party-{i}").as_bytes()).into()))
            .collect();
        Self {
            parties,
            contestation_period: ContestationPeriod(60),
            scripts: ScriptRegistry::default(),
            seed: TxIn::new(tx_id("seed"), 0),
        }
    }

    /// Same parties, different head.
    pub fn with_seed(mut self, label: &str) -> Self {
        self.seed = TxIn::new(tx_id(label), 0);
        self
    }

    pub fn head_id(&self) -> HeadId {
        HeadId::from_seed(&self.seed)
    }

    /// Context of the party at `index`.
    pub fn context(&self, index: usize) -> ChainContext {
        ChainContext {
            own_party: self.parties[index],
            parties: self.parties.clone(),
            contestation_period: self.contestation_period,
            scripts: self.scripts.clone(),
        }
    }

    /// Funds the party at `index` commits in the scripted lifecycle.
    pub fn default_commit(&self, index: usize) -> UTxO {
        user_utxo(
            &format!("{}-funds-{index}", self.seed),
            &self.parties[index],
            1_000_000 * (index as u64 + 1),
        )
    }

    fn head_output(&self, datum: HeadDatum) -> TxOut {
        TxOut {
            address: Address::Script(self.scripts.head),
            value: Value::lovelace(MIN_ADA).with_asset(self.head_id().state_token(), 1),
            datum: Some(Datum::Head(datum)),
        }
    }

    fn burn_all(&self) -> BTreeMap<crate::tx::AssetId, i64> {
        let head_id = self.head_id();
        std::iter::once((head_id.state_token(), -1))
            .chain(
                self.parties
                    .iter()
                    .map(|p| (head_id.participation_token(p), -1)),
            )
            .collect()
    }

    pub fn init_tx(&self) -> Tx {
        let head_id = self.head_id();
        let mut outputs = vec![self.head_output(HeadDatum::Initial {
            head_id,
            seed: self.seed,
            parties: self.parties.clone(),
            contestation_period: self.contestation_period,
        })];
        let mut mint = BTreeMap::from([(head_id.state_token(), 1)]);
        for party in &self.parties {
            let token = head_id.participation_token(party);
            outputs.push(TxOut {
                address: Address::Script(self.scripts.initial),
                value: Value::lovelace(MIN_ADA).with_asset(token.clone(), 1),
                datum: Some(Datum::Initial { head_id }),
            });
            mint.insert(token, 1);
        }
        Tx {
            id: tx_id(&format!("init-{}", self.seed)),
            inputs: vec![Input::plain(self.seed)],
            outputs,
            mint,
        }
    }

    pub fn commit_tx(&self, st: &InitialState, party: &Party, committed: UTxO) -> Tx {
        let initial = st
            .initials
            .get(party)
            .copied()
            .expect("party has no pending initial output");
        let refs: Vec<TxIn> = committed.refs().copied().collect();
        let lovelace: u64 = committed.0.values().map(|o| o.value.lovelace).sum();

        let mut inputs = vec![Input::redeemed(
            initial,
            Redeemer::Commit {
                committed: refs.clone(),
            },
        )];
        inputs.extend(refs.into_iter().map(Input::plain));
        Tx {
            id: tx_id(&format!("commit-{}-{party}", st.head_id)),
            inputs,
            outputs: vec![TxOut {
                address: Address::Script(self.scripts.commit),
                value: Value::lovelace(MIN_ADA + lovelace)
                    .with_asset(st.head_id.participation_token(party), 1),
                datum: Some(Datum::Commit {
                    head_id: st.head_id,
                    party: *party,
                    committed,
                }),
            }],
            mint: BTreeMap::new(),
        }
    }

    /// Collects whatever has been committed so far.
    pub fn collect_com_tx(&self, st: &InitialState) -> Tx {
        let mut inputs = vec![Input::redeemed(st.head_output, Redeemer::CollectCom)];
        inputs.extend(st.commits.values().map(|c| Input::plain(c.out_ref)));
        Tx {
            id: tx_id(&format!("collect-{}", st.head_id)),
            inputs,
            outputs: vec![self.head_output(HeadDatum::Open {
                head_id: st.head_id,
                parties: st.parties.clone(),
                contestation_period: st.contestation_period,
                utxo_hash: UtxoHash::of(&st.committed_utxo()),
            })],
            mint: BTreeMap::new(),
        }
    }

    /// Refunds commitments and burns every head token.
    pub fn abort_tx(&self, st: &InitialState) -> Tx {
        let mut inputs = vec![Input::redeemed(st.head_output, Redeemer::Abort)];
        inputs.extend(st.initials.values().map(|r| Input::plain(*r)));
        inputs.extend(st.commits.values().map(|c| Input::plain(c.out_ref)));
        Tx {
            id: tx_id(&format!("abort-{}", st.head_id)),
            inputs,
            outputs: st.committed_utxo().0.into_values().collect(),
            mint: self.burn_all(),
        }
    }

    pub fn close_tx(
        &self,
        st: &OpenState,
        snapshot_number: u64,
        utxo_hash: UtxoHash,
        contestation_deadline: UtcTime,
    ) -> Tx {
        Tx {
            id: tx_id(&format!("close-{}-{snapshot_number}", st.head_id)),
            inputs: vec![Input::redeemed(st.head_output, Redeemer::Close)],
            outputs: vec![self.head_output(HeadDatum::Closed {
                head_id: st.head_id,
                parties: st.parties.clone(),
                contestation_period: st.contestation_period,
                snapshot_number,
                utxo_hash,
                contestation_deadline,
                contesters: Vec::new(),
            })],
            mint: BTreeMap::new(),
        }
    }

    /// Contest by `contester`; pushes the deadline out by one contestation period.
    pub fn contest_tx(
        &self,
        st: &ClosedState,
        contester: &Party,
        snapshot_number: u64,
        utxo_hash: UtxoHash,
    ) -> Tx {
        let mut contesters = st.contesters.clone();
        contesters.push(*contester);
        let extension = chrono::TimeDelta::seconds(st.contestation_period.0 as i64);
        Tx {
            id: tx_id(&format!("contest-{}-{contester}-{snapshot_number}", st.head_id)),
            inputs: vec![Input::redeemed(st.head_output, Redeemer::Contest)],
            outputs: vec![self.head_output(HeadDatum::Closed {
                head_id: st.head_id,
                parties: st.parties.clone(),
                contestation_period: st.contestation_period,
                snapshot_number,
                utxo_hash,
                contestation_deadline: st.contestation_deadline + extension,
                contesters,
            })],
            mint: BTreeMap::new(),
        }
    }

    /// Distributes `utxo` in reference order.
    pub fn fanout_tx(&self, st: &ClosedState, utxo: &UTxO) -> Tx {
        Tx {
            id: tx_id(&format!("fanout-{}", st.head_id)),
            inputs: vec![Input::redeemed(
                st.head_output,
                Redeemer::Fanout {
                    num_outputs: utxo.len() as u32,
                },
            )],
            outputs: utxo.0.values().cloned().collect(),
            mint: self.burn_all(),
        }
    }

    /// Init followed by one commit per party, in party order.
    pub fn opening_txs(&self) -> Vec<Tx> {
        let init = self.init_tx();
        let idle = IdleState { ctx: self.context(0) };
        let (mut st, _) = observe_init(&idle, &init).expect("scripted init is recognized");
        let mut txs = vec![init];
        for (index, party) in self.parties.iter().enumerate() {
            let tx = self.commit_tx(&st, party, self.default_commit(index));
            st = observe_commit(&st, &tx).expect("scripted commit is recognized").0;
            txs.push(tx);
        }
        txs
    }

    /// The full lifecycle: init, commits, collect, close, one contest, fanout.
    pub fn lifecycle_txs(&self, contestation_deadline: UtcTime) -> Vec<Tx> {
        let mut txs = self.opening_txs();
        let mut initial = observe_init(&IdleState { ctx: self.context(0) }, &txs[0])
            .expect("scripted init is recognized")
            .0;
        for tx in &txs[1..] {
            initial = observe_commit(&initial, tx)
                .expect("scripted commit is recognized")
                .0;
        }

        let collect = self.collect_com_tx(&initial);
        let open = observe_collect_com(&initial, &collect)
            .expect("scripted collect is recognized")
            .0;
        let close = self.close_tx(&open, 0, open.utxo_hash, contestation_deadline);
        let closed = observe_close(&open, &close)
            .expect("scripted close is recognized")
            .0;
        let contester = *self.parties.last().expect("scenario has parties");
        let contest = self.contest_tx(&closed, &contester, 1, closed.utxo_hash);
        let contested = observe_contest(&closed, &contest)
            .expect("scripted contest is recognized")
            .0;
        let fanout = self.fanout_tx(&contested, &initial.committed_utxo());

        txs.extend([collect, close, contest, fanout]);
        txs
    }
}
