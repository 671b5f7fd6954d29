//! Example: follow a chain from JSON-line notifications on stdin and print chain events.
//!
//! Each stdin line is a `ChainSyncNotification`, e.g.
//!
//!   {"roll_forward": {"slot": 12, "hash": "00..00", "transactions": []}}
//!   {"roll_backward": 11}
//!
//! Usage:
//!
//!   cargo run -p head-sync --example follow -- --config chain.json [--time-params params.json]
//!
//! Without `--time-params`, time parameters are queried from `time_refresh.http_url`.

use anyhow::{Context, Result};
use futures_util::stream;
use head_chain::TimeParams;
use head_sync::{
    spawn_time_refresher, ChainConfig, ChainSync, ChainSyncNotification, HttpTimeParams,
};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn arg_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Reads stdin on a blocking thread; malformed lines are logged and skipped.
fn stdin_notifications() -> mpsc::Receiver<ChainSyncNotification> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for (number, line) in std::io::stdin().lock().lines().enumerate() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(notification) => {
                    if tx.blocking_send(notification).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let line_no = number + 1;
                    tracing::warn!(line = line_no, reason = %e, "skipping malformed notification")
                }
            }
        }
    });
    rx
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("head_sync=info".parse()?))
        .with_writer(std::io::stderr)
        .init();
    let args: Vec<String> = std::env::args().collect();
    let config_path = arg_value(&args, "--config").context("--config is required")?;
    let config = ChainConfig::from_json_file(config_path)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (time, refresher) = match arg_value(&args, "--time-params") {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read time params {path}"))?;
                let params: TimeParams = serde_json::from_str(&raw).context("parse time params")?;
                spawn_time_refresher(params, config.time_refresh.clone()).await?
            }
            None => {
                let source = HttpTimeParams::new(config.time_refresh.http_url.clone());
                spawn_time_refresher(source, config.time_refresh.clone()).await?
            }
        };

        let (sync, mut events) = ChainSync::new(config.chain_context(), time, config.event_buffer);
        let notifications = stream::unfold(stdin_notifications(), |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        });
        let mut driver = tokio::spawn(sync.run(notifications));

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => println!("{}", serde_json::to_string(&event)?),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    driver.abort();
                    break;
                }
            }
        }
        refresher.abort();
        match (&mut driver).await {
            Ok(result) => result.context("chain sync stopped")?,
            Err(e) if e.is_cancelled() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    })
}
