//! Head chain sync runtime: follows the base chain on behalf of one head.
//!
//! - **ChainSyncHandler**: turns roll-forward/roll-backward notifications into [ChainEvent]s
//!   (ticks, observations, rollbacks) delivered through a [ChainCallback].
//! - **LocalChainState**: versioned history of adopted head states, rewound on rollback and
//!   readable as whole snapshots.
//! - **ChainSync**: drives the handler from a notification stream and forwards events over a
//!   bounded channel.
//! - **Time refresher**: keeps the slot/time conversion handle current.
//! - **StatusServer**: capnp-rpc view of the local chain state.

#[allow(unused_parens)] // generated capnp code
pub mod head_capnp {
    include!(concat!(env!("OUT_DIR"), "/capnp/head_capnp.rs"));
}

pub mod config;
pub mod follower;
pub mod handler;
pub mod local_state;
pub mod status;
pub mod time_source;

pub use config::{ChainConfig, TimeRefreshConfig};
pub use follower::{ChainSync, ChainSyncNotification, EventBuffer};
pub use handler::{
    ChainCallback, ChainEvent, ChainSyncError, ChainSyncHandler, Continuation, GetTimeHandle,
};
pub use local_state::{ChainStateHistory, LocalChainState};
pub use status::{status_client, StatusServer};
pub use time_source::{spawn_time_refresher, HttpTimeParams, TimeParamsSource};
