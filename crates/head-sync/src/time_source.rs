//! Time handle refresher: keeps a current [TimeHandle] available to the chain sync handler.
//!
//! The era history and safe horizon move as the base chain advances, so the handle is
//! re-queried periodically and swapped atomically through a `watch` channel.

use crate::config::TimeRefreshConfig;
use anyhow::{Context, Result};
use head_chain::{TimeHandle, TimeParams};
use rand::Rng;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Provider of era history, system start and horizon.
pub trait TimeParamsSource: Send + Sync + 'static {
    fn query(&self) -> impl Future<Output = Result<TimeParams>> + Send;
}

/// Fixed parameters, for replays and tests.
impl TimeParamsSource for TimeParams {
    fn query(&self) -> impl Future<Output = Result<TimeParams>> + Send {
        let params = self.clone();
        async move { Ok(params) }
    }
}

async fn http_json_rpc(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    id: u64,
) -> Result<Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;
    let json: Value = resp.json().await.context("parse response")?;
    if let Some(err) = json.get("error") {
        anyhow::bail!("RPC error: {}", err);
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing result"))
}

/// JSON-RPC provider exposing a `query_time_params` method.
#[derive(Debug, Clone)]
pub struct HttpTimeParams {
    client: reqwest::Client,
    url: String,
}

impl HttpTimeParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl TimeParamsSource for HttpTimeParams {
    fn query(&self) -> impl Future<Output = Result<TimeParams>> + Send {
        async move {
            let result =
                http_json_rpc(&self.client, &self.url, "query_time_params", json!([]), 1).await?;
            serde_json::from_value(result).context("decode time params")
        }
    }
}

async fn fetch_handle<S: TimeParamsSource>(source: &S) -> Result<TimeHandle> {
    let params = source.query().await?;
    TimeHandle::new(params).context("invalid era history")
}

/// Fetches an initial handle (which must succeed) and spawns a task that refreshes it every
/// `interval_secs`. Failed refreshes keep the previous handle and retry with capped
/// exponential backoff. The task ends once every receiver is dropped.
pub async fn spawn_time_refresher<S: TimeParamsSource>(
    source: S,
    config: TimeRefreshConfig,
) -> Result<(watch::Receiver<Arc<TimeHandle>>, JoinHandle<()>)> {
    let handle = fetch_handle(&source)
        .await
        .context("initial time parameters")?;
    tracing::info!(horizon = %handle.horizon(), "time handle ready");
    let (sender, receiver) = watch::channel(Arc::new(handle));
    let task = tokio::spawn(refresh_loop(source, config, sender));
    Ok((receiver, task))
}

async fn refresh_loop<S: TimeParamsSource>(
    source: S,
    config: TimeRefreshConfig,
    sender: watch::Sender<Arc<TimeHandle>>,
) {
    let interval = Duration::from_secs(config.interval_secs.max(1));
    let initial_backoff = Duration::from_secs(config.initial_backoff_secs.max(1));
    let max_backoff = Duration::from_secs(config.max_backoff_secs).max(initial_backoff);
    let mut backoff = initial_backoff;
    let mut delay = interval;

    loop {
        sleep(delay).await;
        if sender.is_closed() {
            tracing::debug!("no time handle readers left; stopping refresher");
            return;
        }
        match fetch_handle(&source).await {
            Ok(handle) => {
                let horizon = handle.horizon();
                if sender.send(Arc::new(handle)).is_err() {
                    return;
                }
                tracing::debug!(%horizon, "time handle refreshed");
                backoff = initial_backoff;
                delay = interval;
            }
            Err(e) => {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                delay = backoff + jitter;
                tracing::warn!(reason = %e, retry_in = ?delay, "time parameter refresh failed");
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use head_chain::{ChainSlot, EraHistory};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn params(horizon: u64) -> TimeParams {
        TimeParams {
            system_start: Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
            era_history: EraHistory::single(std::time::Duration::from_secs(1), 86_400),
            horizon: ChainSlot(horizon),
            current_slot: ChainSlot(horizon / 2),
        }
    }

    /// Horizon grows by 10 per query; the queries listed in `failing` error out.
    struct Advancing {
        calls: AtomicU64,
        failing: Vec<u64>,
    }

    impl TimeParamsSource for Advancing {
        fn query(&self) -> impl Future<Output = Result<TimeParams>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.failing.contains(&n);
            async move {
                if fail {
                    anyhow::bail!("provider unavailable");
                }
                Ok(params(100 + 10 * n))
            }
        }
    }

    fn config() -> TimeRefreshConfig {
        TimeRefreshConfig {
            interval_secs: 5,
            initial_backoff_secs: 1,
            max_backoff_secs: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn initial_failure_is_reported() {
        let source = Advancing {
            calls: AtomicU64::new(0),
            failing: vec![0],
        };
        let err = spawn_time_refresher(source, config()).await.unwrap_err();
        assert!(format!("{err:#}").contains("provider unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_swaps_handle() {
        let source = Advancing {
            calls: AtomicU64::new(0),
            failing: vec![],
        };
        let (mut rx, task) = spawn_time_refresher(source, config()).await.unwrap();
        assert_eq!(rx.borrow().horizon(), ChainSlot(100));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().horizon(), ChainSlot(110));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_handle_and_retries() {
        let source = Advancing {
            calls: AtomicU64::new(0),
            failing: vec![1, 2],
        };
        let (mut rx, task) = spawn_time_refresher(source, config()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().horizon(), ChainSlot(130));
        task.abort();
    }

    #[tokio::test]
    async fn invalid_era_history_is_rejected() {
        let mut bad = params(100);
        bad.era_history = EraHistory(vec![]);
        let err = spawn_time_refresher(bad, config()).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid era history"));
    }
}
