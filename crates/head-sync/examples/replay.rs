//! Example: replay a scripted three-party head opening through ChainSync and print each chain
//! event as a JSON line.
//!
//! Blocks at slots 10..=13 carry the init and one commit per party. The follower then rolls
//! back to slot 11 and replays slots 12 and 13, followed by an empty block at slot 14.
//!
//! Usage:
//!
//!   cargo run -p head-sync --example replay
//!
//! Options:
//!   --rollback SLOT   Roll back to SLOT instead of 11.

use anyhow::Context;
use chrono::{TimeZone, Utc};
use head_chain::test_utils::HeadScenario;
use head_chain::{Block, BlockHash, ChainSlot, EraHistory, TimeParams, Tx};
use head_sync::{spawn_time_refresher, ChainSync, ChainSyncNotification, TimeRefreshConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn roll_forward(slot: u64, transactions: Vec<Tx>) -> ChainSyncNotification {
    ChainSyncNotification::RollForward(Block {
        slot: ChainSlot(slot),
        hash: BlockHash([slot as u8; 32]),
        transactions,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!(
            "Usage: replay [--rollback SLOT]\n\
             Replays a scripted head opening and prints chain events as JSON lines."
        );
        std::process::exit(0);
    }
    let rollback_to = match args.iter().position(|a| a == "--rollback") {
        Some(i) => args
            .get(i + 1)
            .context("--rollback needs a slot")?
            .parse::<u64>()
            .context("parse rollback slot")?,
        None => 11,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let scenario = HeadScenario::new(3);
        let params = TimeParams {
            system_start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .context("system start")?,
            era_history: EraHistory::single(Duration::from_secs(1), 86_400),
            horizon: ChainSlot(10_000),
            current_slot: ChainSlot(0),
        };
        let (time, refresher) = spawn_time_refresher(params, TimeRefreshConfig::default()).await?;

        let txs = scenario.opening_txs();
        let mut notifications: Vec<_> = txs
            .iter()
            .zip(10..)
            .map(|(tx, slot)| roll_forward(slot, vec![tx.clone()]))
            .collect();
        notifications.push(ChainSyncNotification::RollBackward(ChainSlot(rollback_to)));
        notifications.extend(
            txs.iter()
                .zip(10..)
                .filter(|(_, slot)| *slot > rollback_to)
                .map(|(tx, slot)| roll_forward(slot, vec![tx.clone()])),
        );
        notifications.push(roll_forward(14, vec![]));

        let (sync, mut events) = ChainSync::new(scenario.context(0), time, 16);
        let driver = tokio::spawn(sync.run(futures_util::stream::iter(notifications)));
        while let Some(event) = events.recv().await {
            println!("{}", serde_json::to_string(&event)?);
        }
        driver.await??;
        refresher.abort();
        Ok(())
    })
}
