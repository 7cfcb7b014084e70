//! Coalescing Cache demo driver
//!
//! Issues bursts of concurrent lookups against a cache backed by a slow
//! fetcher and prints a JSON report of how many fetches actually ran.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinSet, LocalSet};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coalescing_cache::{CacheStore, Config, FetchCompletion, LocalScheduler};

/// Outcome of one burst of lookups.
#[derive(Debug, Serialize)]
struct RoundReport {
    round: usize,
    requests: usize,
    fetches: usize,
    successes: usize,
    failures: usize,
    size_after: usize,
}

#[derive(Debug, Serialize)]
struct RunReport {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    capacity: usize,
    ttl_ms: u64,
    fetch_delay_ms: u64,
    rounds: Vec<RoundReport>,
}

/// Main entry point for the demo driver.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Run a cold and a warm burst of lookups on a local task set
/// 4. Print the JSON report to stdout
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coalescing_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: capacity={}, ttl={}ms, fetch_delay={}ms",
        config.capacity, config.ttl_ms, config.fetch_delay_ms
    );

    let local = LocalSet::new();
    let report = local.run_until(run(config)).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<RunReport> {
    let started_at = Utc::now();
    let fetches = Rc::new(Cell::new(0usize));

    let counter = fetches.clone();
    let delay = config.fetch_delay();
    let fetcher = move |key: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
        let counter = counter.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            counter.set(counter.get() + 1);
            let value = format!("{key}_value");
            if let Err(err) = done.complete(Ok(value)) {
                warn!(error = %err, "failed to deliver fetched value");
            }
        });
        Ok(())
    };
    let cache = CacheStore::from_config(&config, fetcher, LocalScheduler::new())?;
    info!("Cache store initialized");

    let mut rounds = Vec::new();
    for round in 1..=2 {
        let before = fetches.get();
        let mut lookups = JoinSet::new();
        for _ in 0..config.demo_requests_per_key {
            for i in 0..config.demo_keys {
                lookups.spawn_local(cache.load(format!("foo{i}")));
            }
        }
        let requests = lookups.len();

        let (mut successes, mut failures) = (0, 0);
        while let Some(joined) = lookups.join_next().await {
            match joined? {
                Ok(_) => successes += 1,
                Err(err) => {
                    warn!(error = %err, "lookup failed");
                    failures += 1;
                }
            }
        }

        let report = RoundReport {
            round,
            requests,
            fetches: fetches.get() - before,
            successes,
            failures,
            size_after: cache.size(),
        };
        info!(
            "Round {} finished: {} requests, {} fetches, size={}",
            report.round, report.requests, report.fetches, report.size_after
        );
        rounds.push(report);
    }

    Ok(RunReport {
        started_at,
        finished_at: Utc::now(),
        capacity: config.capacity,
        ttl_ms: config.ttl_ms,
        fetch_delay_ms: config.fetch_delay_ms,
        rounds,
    })
}
