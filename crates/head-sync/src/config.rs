//! Node configuration for the chain layer.

use anyhow::{Context, Result};
use head_chain::{ChainContext, ContestationPeriod, Party, ScriptRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Who we are and which head we are willing to track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub own_party: Party,
    /// Other parties of the head.
    #[serde(default)]
    pub peers: Vec<Party>,
    #[serde(default = "default_contestation_period")]
    pub contestation_period: ContestationPeriod,
    #[serde(default)]
    pub scripts: ScriptRegistry,
    /// Capacity of the event channel towards the protocol core.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub time_refresh: TimeRefreshConfig,
}

fn default_contestation_period() -> ContestationPeriod {
    ContestationPeriod(60)
}

fn default_event_buffer() -> usize {
    256
}

impl ChainConfig {
    pub fn new(own_party: Party, peers: Vec<Party>) -> Self {
        Self {
            own_party,
            peers,
            contestation_period: default_contestation_period(),
            scripts: ScriptRegistry::default(),
            event_buffer: default_event_buffer(),
            time_refresh: TimeRefreshConfig::default(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn chain_context(&self) -> ChainContext {
        let parties = std::iter::once(self.own_party)
            .chain(self.peers.iter().copied())
            .collect();
        ChainContext {
            own_party: self.own_party,
            parties,
            contestation_period: self.contestation_period,
            scripts: self.scripts.clone(),
        }
    }
}

/// Time-parameter provider endpoint and refresh backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRefreshConfig {
    /// JSON-RPC URL answering `query_time_params`.
    pub http_url: String,
    pub interval_secs: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for TimeRefreshConfig {
    fn default() -> Self {
        Self {
            http_url: "http://127.0.0.1:1337".to_string(),
            interval_secs: 20,
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}
