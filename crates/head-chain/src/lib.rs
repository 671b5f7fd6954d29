//! Pure core of the head chain layer: what the base chain says about one head.
//!
//! - **time**: slot/wall-clock conversion from an era history, bounded by a safe horizon.
//! - **tx**: decoded transactions and the protocol's datums, redeemers and tokens.
//! - **state**: the head lifecycle as a closed sum type, and the recognizers that advance it.
//! - **observe**: block-level observation over a sequence of transactions.
//!
//! Nothing here performs I/O or reads a clock; the runtime lives in `head-sync`.

pub mod observe;
pub mod slot;
pub mod state;
pub mod time;
pub mod tx;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use observe::{observe_transactions, Observed, ObservedBlock};
pub use slot::ChainSlot;
pub use state::{
    match_init, observe_abort, observe_close, observe_collect_com, observe_commit,
    observe_contest, observe_fanout, observe_init, observe_some_tx, ChainContext, ChainStateAt,
    ClosedState, Commitment, FinalState, HeadState, IdleState, InitialState, NotAnInit,
    OnChainTx, OpenState, Stage,
};
pub use time::{
    Bound, EraHistory, EraHistoryError, EraParams, EraSummary, TimeConversionError, TimeHandle,
    TimeParams, UtcTime,
};
pub use tx::{
    Address, AssetId, AssetName, Block, BlockHash, ContestationPeriod, Datum, HeadDatum, HeadId,
    Input, Party, Redeemer, ScriptHash, ScriptRegistry, Tx, TxDecodeError, TxId, TxIn, TxOut,
    UTxO, UtxoHash, Value,
};
