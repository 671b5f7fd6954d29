//! Decoded base-chain transactions and the head protocol's on-chain encodings.
//!
//! Identifiers serialize as hex strings (transaction inputs as `txid#index`) so every map in
//! the model is a valid JSON object as well as a canonical CBOR map.

use crate::slot::ChainSlot;
use crate::time::UtcTime;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Asset name of the head's state token.
pub const STATE_TOKEN_NAME: &[u8] = b"HeadStateV1";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IdParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    #[error("malformed identifier: {0}")]
    Format(String),
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
                <[u8; $len]>::try_from(bytes.as_slice())
                    .map($name)
                    .map_err(|_| IdParseError::Length {
                        expected: $len,
                        got: bytes.len(),
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_id!(TxId, 32);
hex_id!(BlockHash, 32);
hex_id!(
    /// Hash of a validator script; outputs locked by the protocol sit at these addresses.
    ScriptHash,
    28
);
hex_id!(KeyHash, 28);
hex_id!(PolicyId, 28);
hex_id!(
    /// Identifier of one head: the policy id of its minting script.
    HeadId,
    28
);
hex_id!(
    /// A head participant, identified by its verification key.
    Party,
    32
);
hex_id!(UtxoHash, 32);

fn sha3_prefix<const N: usize>(domain: &[u8], parts: &[&[u8]]) -> [u8; N] {
    let mut hasher = Sha3_256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}

impl ScriptHash {
    /// Hash identifying a named protocol validator.
    pub fn of_name(name: &str) -> Self {
        ScriptHash(sha3_prefix(b"script", &[name.as_bytes()]))
    }
}

impl HeadId {
    /// The head's minting policy is parametrized by the seed input it spends, so the
    /// head id is a function of that input.
    pub fn from_seed(seed: &TxIn) -> Self {
        HeadId(sha3_prefix(
            b"head-seed",
            &[&seed.tx_id.0, &seed.index.to_be_bytes()],
        ))
    }

    pub fn policy_id(&self) -> PolicyId {
        PolicyId(self.0)
    }

    pub fn state_token(&self) -> AssetId {
        AssetId {
            policy: self.policy_id(),
            name: AssetName(STATE_TOKEN_NAME.to_vec()),
        }
    }

    pub fn participation_token(&self, party: &Party) -> AssetId {
        AssetId {
            policy: self.policy_id(),
            name: party.token_name(),
        }
    }
}

impl Party {
    pub fn key_hash(&self) -> KeyHash {
        KeyHash(sha3_prefix(b"party", &[&self.0]))
    }

    pub fn token_name(&self) -> AssetName {
        AssetName(self.key_hash().0.to_vec())
    }
}

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxIn {
    pub tx_id: TxId,
    pub index: u32,
}

impl TxIn {
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }
}

impl fmt::Display for TxIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_id, self.index)
    }
}

impl FromStr for TxIn {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, index) = s
            .split_once('#')
            .ok_or_else(|| IdParseError::Format(format!("missing '#' in {s}")))?;
        let index = index
            .parse::<u32>()
            .map_err(|e| IdParseError::Format(format!("output index: {e}")))?;
        Ok(TxIn {
            tx_id: id.parse()?,
            index,
        })
    }
}

impl Serialize for TxIn {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxIn {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetName(pub Vec<u8>);

/// Native asset class. Serializes as `policy.name` (both hex).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId {
    pub policy: PolicyId,
    pub name: AssetName,
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.policy, hex::encode(&self.name.0))
    }
}

impl FromStr for AssetId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (policy, name) = s
            .split_once('.')
            .ok_or_else(|| IdParseError::Format(format!("missing '.' in {s}")))?;
        Ok(AssetId {
            policy: policy.parse()?,
            name: AssetName(hex::decode(name)?),
        })
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Key(KeyHash),
    Script(ScriptHash),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub lovelace: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<AssetId, u64>,
}

impl Value {
    pub fn lovelace(lovelace: u64) -> Self {
        Self {
            lovelace,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, asset: AssetId, quantity: u64) -> Self {
        *self.assets.entry(asset).or_default() += quantity;
        self
    }

    pub fn quantity_of(&self, asset: &AssetId) -> u64 {
        self.assets.get(asset).copied().unwrap_or(0)
    }
}

/// Contestation period, in whole seconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContestationPeriod(pub u64);

impl ContestationPeriod {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

/// Datum stored in the head validator's output, one shape per lifecycle stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadDatum {
    Initial {
        head_id: HeadId,
        seed: TxIn,
        parties: Vec<Party>,
        contestation_period: ContestationPeriod,
    },
    Open {
        head_id: HeadId,
        parties: Vec<Party>,
        contestation_period: ContestationPeriod,
        utxo_hash: UtxoHash,
    },
    Closed {
        head_id: HeadId,
        parties: Vec<Party>,
        contestation_period: ContestationPeriod,
        snapshot_number: u64,
        utxo_hash: UtxoHash,
        contestation_deadline: UtcTime,
        contesters: Vec<Party>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Datum {
    Head(HeadDatum),
    Initial {
        head_id: HeadId,
    },
    Commit {
        head_id: HeadId,
        party: Party,
        committed: UTxO,
    },
    /// Anything not produced by the protocol.
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redeemer {
    /// Spends an initial output into a commit output; lists the committed references.
    Commit { committed: Vec<TxIn> },
    CollectCom,
    Close,
    Contest,
    Fanout { num_outputs: u32 },
    Abort,
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub out_ref: TxIn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemer: Option<Redeemer>,
}

impl Input {
    pub fn plain(out_ref: TxIn) -> Self {
        Self {
            out_ref,
            redeemer: None,
        }
    }

    pub fn redeemed(out_ref: TxIn, redeemer: Redeemer) -> Self {
        Self {
            out_ref,
            redeemer: Some(redeemer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub address: Address,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<Datum>,
}

/// Unspent outputs keyed by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UTxO(pub BTreeMap<TxIn, TxOut>);

impl UTxO {
    pub fn singleton(out_ref: TxIn, out: TxOut) -> Self {
        UTxO(BTreeMap::from([(out_ref, out)]))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn refs(&self) -> impl Iterator<Item = &TxIn> {
        self.0.keys()
    }

    /// Union; entries of `other` win on conflicting references.
    pub fn union(mut self, other: &UTxO) -> UTxO {
        self.0.extend(other.0.iter().map(|(k, v)| (*k, v.clone())));
        self
    }
}

impl FromIterator<(TxIn, TxOut)> for UTxO {
    fn from_iter<I: IntoIterator<Item = (TxIn, TxOut)>>(iter: I) -> Self {
        UTxO(iter.into_iter().collect())
    }
}

impl UtxoHash {
    /// Hash of a UTxO set: its outputs in reference order.
    pub fn of(utxo: &UTxO) -> Self {
        Self::of_outputs(utxo.0.values())
    }

    pub fn of_outputs<'a>(outputs: impl IntoIterator<Item = &'a TxOut>) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(b"utxo");
        let mut buf = Vec::new();
        for out in outputs {
            buf.clear();
            // A Vec writer never fails and the model has no fallible Serialize impls.
            if ciborium::ser::into_writer(out, &mut buf).is_err() {
                buf.clear();
            }
            hasher.update((buf.len() as u64).to_be_bytes());
            hasher.update(&buf);
        }
        UtxoHash(hasher.finalize().into())
    }
}

/// Hashes of the protocol validators this node recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRegistry {
    pub head: ScriptHash,
    pub initial: ScriptHash,
    pub commit: ScriptHash,
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self {
            head: ScriptHash::of_name("head-v1"),
            initial: ScriptHash::of_name("initial-v1"),
            commit: ScriptHash::of_name("commit-v1"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TxDecodeError {
    #[error("CBOR decode error: {0}")]
    Decode(String),

    #[error("CBOR encode error: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub id: TxId,
    pub inputs: Vec<Input>,
    pub outputs: Vec<TxOut>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mint: BTreeMap<AssetId, i64>,
}

impl Tx {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, TxDecodeError> {
        ciborium::de::from_reader(Cursor::new(bytes))
            .map_err(|e| TxDecodeError::Decode(e.to_string()))
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, TxDecodeError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| TxDecodeError::Encode(e.to_string()))?;
        Ok(buf)
    }

    pub fn spends(&self, out_ref: &TxIn) -> bool {
        self.inputs.iter().any(|i| &i.out_ref == out_ref)
    }

    /// Redeemer attached to the input spending `out_ref`.
    pub fn redeemer_for(&self, out_ref: &TxIn) -> Option<&Redeemer> {
        self.inputs
            .iter()
            .find(|i| &i.out_ref == out_ref)
            .and_then(|i| i.redeemer.as_ref())
    }

    /// Outputs with their references, in order.
    pub fn produced(&self) -> impl Iterator<Item = (TxIn, &TxOut)> + '_ {
        self.outputs
            .iter()
            .zip(0u32..)
            .map(move |(out, index)| (TxIn::new(self.id, index), out))
    }

    /// Outputs locked by `script`, with their references.
    pub fn outputs_at(&self, script: ScriptHash) -> impl Iterator<Item = (TxIn, &TxOut)> + '_ {
        self.produced()
            .filter(move |(_, out)| out.address == Address::Script(script))
    }

    /// Net quantity minted (positive) or burned (negative).
    pub fn minted(&self, asset: &AssetId) -> i64 {
        self.mint.get(asset).copied().unwrap_or(0)
    }
}

/// A roll-forward block as delivered by the chain follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub slot: ChainSlot,
    pub hash: BlockHash,
    pub transactions: Vec<Tx>,
}

impl Block {
    /// Decodes raw CBOR transactions. Transactions that fail to decode are foreign to us and
    /// are skipped.
    pub fn decode(slot: ChainSlot, hash: BlockHash, raw_txs: &[Vec<u8>]) -> Self {
        let transactions = raw_txs
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                Tx::from_cbor(raw)
                    .map_err(|e| {
                        tracing::debug!(
                            %slot,
                            index,
                            reason = %e,
                            "undecodable transaction skipped"
                        )
                    })
                    .ok()
            })
            .collect();
        Self {
            slot,
            hash,
            transactions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_in(byte: u8, index: u32) -> TxIn {
        TxIn::new(TxId([byte; 32]), index)
    }

    #[test]
    fn tx_in_display_parses_back() {
        let r = tx_in(0xab, 7);
        let s = r.to_string();
        assert!(s.ends_with("#7"));
        assert_eq!(s.parse::<TxIn>().unwrap(), r);
        assert!("abcd".parse::<TxIn>().is_err());
    }

    #[test]
    fn short_ids_are_rejected() {
        let err = "abcd".parse::<HeadId>().unwrap_err();
        assert_eq!(
            err,
            IdParseError::Length {
                expected: 28,
                got: 2
            }
        );
    }

    #[test]
    fn non_hex_ids_keep_the_decode_error() {
        let err = "0xnothex".parse::<TxId>().unwrap_err();
        assert!(matches!(err, IdParseError::Hex(_)));
        assert_eq!(err.clone(), err);
        assert!(err.to_string().starts_with("invalid hex"));
    }

    #[test]
    fn head_id_depends_on_seed() {
        assert_eq!(HeadId::from_seed(&tx_in(1, 0)), HeadId::from_seed(&tx_in(1, 0)));
        assert_ne!(HeadId::from_seed(&tx_in(1, 0)), HeadId::from_seed(&tx_in(1, 1)));
    }

    #[test]
    fn utxo_hash_follows_reference_order() {
        let a = TxOut {
            address: Address::Key(KeyHash([1; 28])),
            value: Value::lovelace(5),
            datum: None,
        };
        let b = TxOut {
            address: Address::Key(KeyHash([2; 28])),
            value: Value::lovelace(7),
            datum: None,
        };
        let utxo: UTxO = [(tx_in(9, 0), b.clone()), (tx_in(1, 0), a.clone())]
            .into_iter()
            .collect();
        assert_eq!(UtxoHash::of(&utxo), UtxoHash::of_outputs([&a, &b]));
        assert_ne!(UtxoHash::of(&utxo), UtxoHash::of_outputs([&b, &a]));
    }

    #[test]
    fn tx_survives_cbor_and_json() {
        let head_id = HeadId::from_seed(&tx_in(3, 0));
        let tx = Tx {
            id: TxId([4; 32]),
            inputs: vec![Input::redeemed(tx_in(3, 0), Redeemer::Fanout { num_outputs: 1 })],
            outputs: vec![TxOut {
                address: Address::Script(ScriptHash::of_name("head-v1")),
                value: Value::lovelace(2).with_asset(head_id.state_token(), 1),
                datum: Some(Datum::Initial { head_id }),
            }],
            mint: BTreeMap::from([(head_id.state_token(), -1)]),
        };
        assert_eq!(Tx::from_cbor(&tx.to_cbor().unwrap()).unwrap(), tx);
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(serde_json::from_str::<Tx>(&json).unwrap(), tx);
    }

    #[test]
    fn block_decode_skips_garbage() {
        let tx = Tx {
            id: TxId([5; 32]),
            inputs: vec![],
            outputs: vec![],
            mint: BTreeMap::new(),
        };
        let raw = vec![vec![0xff, 0x00, 0x13], tx.to_cbor().unwrap()];
        let block = Block::decode(ChainSlot(3), BlockHash([0; 32]), &raw);
        assert_eq!(block.transactions, vec![tx]);
    }
}
