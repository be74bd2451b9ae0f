// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! evsync soak harness.
//!
//! Drives a synchronizer on a single scheduler thread with a crowd of
//! per-player and world events, and after every round probes the wakeup
//! chain: a player's event parks behind its predecessor, the predecessor is
//! exited from a worker thread, and the parked event must resume on the
//! scheduler thread within the latency budget.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use evsync_config::{ConfigService, FsConfigStore};
use evsync_core::{
    make_subject_id, EventClassification, SubjectId, SyncConfig, SyncEntry, Synchronizer,
};
use tokio::task::LocalSet;
use tokio::time::timeout;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const CONFIG_KEY: &str = "evsync";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Distinct players active per round
    #[clap(short, long, default_value_t = 23)]
    subjects: usize,

    /// Rounds to run
    #[clap(short, long, default_value_t = 50)]
    rounds: usize,

    /// Maximum allowed park-to-resume latency for the probe, in milliseconds
    #[clap(short, long, default_value_t = 500)]
    budget_ms: u64,

    /// Directory holding `evsync.json`; defaults to the platform config dir
    #[clap(long)]
    config_dir: Option<PathBuf>,

    /// Override `slow_wait_warn_ms`
    #[clap(long)]
    slow_wait_warn_ms: Option<u64>,

    /// Override `repark_warn_threshold`
    #[clap(long)]
    repark_warn_threshold: Option<u32>,

    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = resolve_config(&args);
    info!(?config, subjects = args.subjects, rounds = args.rounds, "starting evsync soak");

    let budget = Duration::from_millis(args.budget_ms);
    let worst = LocalSet::new()
        .run_until(soak(&args, config, budget))
        .await?;

    info!(worst_ms = worst.as_secs_f64() * 1e3, budget_ms = args.budget_ms, "soak finished");
    if worst > budget {
        bail!("worst resume lag {worst:?} exceeded budget {budget:?}");
    }
    Ok(())
}

/// Stored config with CLI overrides applied. Storage problems are logged and
/// fall back to defaults.
fn resolve_config(args: &Args) -> SyncConfig {
    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    let mut config = match store.and_then(|s| ConfigService::new(s).load_or_init::<SyncConfig>(CONFIG_KEY)) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "config unavailable; using defaults");
            SyncConfig::default()
        }
    };
    if let Some(ms) = args.slow_wait_warn_ms {
        config.slow_wait_warn_ms = ms;
    }
    if let Some(n) = args.repark_warn_threshold {
        config.repark_warn_threshold = n;
    }
    config
}

async fn soak(args: &Args, config: SyncConfig, budget: Duration) -> Result<Duration> {
    let sync = Synchronizer::start(config);
    let players: Vec<SubjectId> = (0..args.subjects)
        .map(|i| make_subject_id(&format!("player-{i}")))
        .collect();
    let probe = make_subject_id("probe");

    let mut worst = Duration::ZERO;
    for round in 0..args.rounds {
        crowd(&sync, &players, round).await?;
        let lag = probe_lag(&sync, probe, budget).await?;
        worst = worst.max(lag);
        debug!(round, lag_us = lag.as_micros(), "round complete");
    }

    let stats = sync.stats();
    info!(
        fast_path = stats.fast_path,
        parked = stats.parked,
        reparked = stats.reparked,
        remote_exits = stats.remote_exits,
        "synchronizer totals"
    );
    if stats.active != 0 || stats.waiting != 0 {
        bail!("entries leaked: {} active, {} waiting", stats.active, stats.waiting);
    }
    Ok(worst)
}

/// One round of player traffic. Every player fires two conflicting events
/// and one disjoint event; every fifth player also edits the world.
async fn crowd(sync: &Synchronizer, players: &[SubjectId], round: usize) -> Result<()> {
    let mut tasks = Vec::with_capacity(players.len() * 4);
    for (i, player) in players.iter().copied().enumerate() {
        let mut events = vec![
            EventClassification::per_subject(player, ["inventory"]),
            EventClassification::per_subject(player, ["inventory", "stats"]),
            EventClassification::per_subject(player, ["chat"]),
        ];
        if (i + round) % 5 == 0 {
            events.push(EventClassification::global(["modify_world", "inventory"]));
        }
        for classification in events {
            let sync = sync.clone();
            tasks.push(tokio::task::spawn_local(async move {
                let entry = sync.enter_event(classification).await?;
                tokio::task::yield_now().await;
                sync.exit_event(entry)
            }));
        }
    }
    for task in tasks {
        task.await.context("crowd task panicked")??;
    }
    Ok(())
}

/// Parks one probe event behind another and exits the blocker from a worker
/// thread. Returns the park-to-resume latency.
async fn probe_lag(sync: &Synchronizer, probe: SubjectId, budget: Duration) -> Result<Duration> {
    let held = sync
        .enter_event(EventClassification::per_subject(probe, ["inventory"]))
        .await?;
    let waiter = sync.enter_event(EventClassification::per_subject(probe, ["inventory"]));
    if !waiter.is_parked() {
        bail!("probe was admitted while its predecessor was active");
    }
    let scheduler = sync.affinity().thread_id();
    let waiter = tokio::task::spawn_local(async move {
        let entry = waiter.await;
        (entry, std::thread::current().id())
    });

    let remote = sync.remote_exit();
    tokio::task::spawn_blocking(move || remote.exit(held))
        .await
        .context("exit worker panicked")??;

    let (entry, resumed_on) = timeout(budget * 4, waiter)
        .await
        .context("probe never resumed")?
        .context("probe task panicked")?;
    let entry: SyncEntry = entry?;
    if resumed_on != scheduler {
        bail!("probe resumed off the scheduler thread");
    }
    let lag = entry.wait_handle().map_or(Duration::ZERO, |h| h.waited());
    sync.exit_event(entry)?;
    Ok(lag)
}
