//! HeadStatus server: read-only view of the local chain state over capnp-rpc, backed by the
//! state's `watch::Receiver`.

use crate::head_capnp;
use crate::local_state::ChainStateHistory;
use capnp::capability::Promise;
use capnp::Error;
use capnp_rpc::new_client;
use head_chain::{ChainStateAt, Stage};
use tokio::sync::watch;

fn stage_to_capnp(stage: Stage) -> head_capnp::Stage {
    match stage {
        Stage::Idle => head_capnp::Stage::Idle,
        Stage::Initial => head_capnp::Stage::Initial,
        Stage::Open => head_capnp::Stage::Open,
        Stage::Closed => head_capnp::Stage::Closed,
        Stage::Final => head_capnp::Stage::Final,
    }
}

fn fill_point_builder(
    builder: &mut head_capnp::chain_point::Builder<'_>,
    state: &ChainStateAt,
) -> Result<(), Error> {
    builder.set_slot(state.recorded_at.get());
    builder.set_stage(stage_to_capnp(state.head_state.stage()));
    let head_id = state
        .head_state
        .head_id()
        .map(|id| id.0.to_vec())
        .unwrap_or_default();
    builder
        .reborrow()
        .init_head_id(head_id.len() as u32)
        .copy_from_slice(&head_id);
    let json = serde_json::to_vec(&state.head_state)
        .map_err(|e| Error::failed(format!("encode head state: {e}")))?;
    builder
        .reborrow()
        .init_state_json(json.len() as u32)
        .copy_from_slice(&json);
    Ok(())
}

pub struct StatusServer {
    receiver: watch::Receiver<ChainStateHistory>,
}

impl StatusServer {
    pub fn new(receiver: watch::Receiver<ChainStateHistory>) -> Self {
        Self { receiver }
    }

    fn snapshot(&self) -> ChainStateHistory {
        self.receiver.borrow().clone()
    }
}

impl head_capnp::head_status::Server for StatusServer {
    fn current(
        &mut self,
        _: head_capnp::head_status::CurrentParams,
        mut results: head_capnp::head_status::CurrentResults,
    ) -> Promise<(), Error> {
        let history = self.snapshot();
        let mut point = results.get().init_point();
        if let Err(e) = fill_point_builder(&mut point, history.latest()) {
            return Promise::err(e);
        }
        Promise::ok(())
    }

    fn history(
        &mut self,
        _: head_capnp::head_status::HistoryParams,
        mut results: head_capnp::head_status::HistoryResults,
    ) -> Promise<(), Error> {
        let history = self.snapshot();
        let mut points = results.get().init_points(history.len() as u32);
        for (index, state) in history.iter().enumerate() {
            let mut point = points.reborrow().get(index as u32);
            if let Err(e) = fill_point_builder(&mut point, state) {
                return Promise::err(e);
            }
        }
        Promise::ok(())
    }
}

/// Builds a HeadStatus capability client from the local chain state's receiver.
pub fn status_client(
    receiver: watch::Receiver<ChainStateHistory>,
) -> head_capnp::head_status::Client {
    new_client(StatusServer::new(receiver))
}
