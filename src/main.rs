// src/main.rs

//! Entry point for the shardlord coordinator process.
//!
//! The command-queue front-end that decides *which* tasks to admit
//! (persistent command log, NOTIFY-driven dispatch) is external to this
//! core (spec §1); this binary wires up the core's own components —
//! config, logging, signal handling, the metadata store, and the task
//! executor — and runs the executor loop to completion.

use anyhow::Result;
use shardlord::config::Config;
use shardlord::core::executor::Executor;
use shardlord::core::metadata::memory::InMemoryMetadataStore;
use shardlord::core::signals::SignalFlags;
use shardlord::core::sql::RetryPolicy;
use std::env;
use tracing::{error, info};

fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("shardlord version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("shardlord.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .init();

    info!(my_id = %config.my_id, shardlord = config.shardlord, "starting shardlord coordinator");

    let signals = SignalFlags::install()?;
    let retry = RetryPolicy::new(config.cmd_retry_naptime, config.poll_interval);
    let mut executor = Executor::new(retry, signals)?;

    // The real catalog is an external Postgres database reached through
    // the metadata-store seam (spec §1); this in-memory store stands in
    // for it until task admission is wired up by the upstream command
    // handler.
    let mut metadata = InMemoryMetadataStore::new();
    let clock = shardlord::core::clock::SystemClock;

    if let Err(e) = executor.run(&clock, &mut metadata) {
        error!("executor loop exited with an error: {e}");
        return Err(e.into());
    }

    info!("shardlord coordinator shutting down, all tasks finished");
    Ok(())
}
