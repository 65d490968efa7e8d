mod api;
mod config;
mod datastore;
mod log;
mod model;

use anyhow::Context;
use dotenv::dotenv;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{event, info, Level};
use tracing_subscriber::EnvFilter;

use config::Config;
use datastore::{ShardedMemoryStorage, TaskStorage};

const SIGNAL_POLL: Duration = Duration::from_millis(100);

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let mut cfg = Config::load()?;
    let env_filter = EnvFilter::try_from_env(log::LOG_FILTER_ENV);
    log::setup(env_filter, &cfg.log)?;
    cfg.apply_env(|key| std::env::var(key).ok());

    event!(Level::INFO, "Starting TaskStore: {}", env!("FULL_VERSION"));

    let storage = Arc::new(ShardedMemoryStorage::new(cfg.storage.max_tasks));
    info!(
        max_tasks = storage.max_tasks(),
        shard_count = storage.shard_count(),
        environment = ?cfg.environment,
        "storage ready"
    );

    tokio::runtime::Builder::new_current_thread()
        .build()?
        .block_on(storage.health_check())
        .context("initial storage health check failed")?;

    let term = Arc::new(AtomicBool::new(false));
    for signal in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGQUIT,
    ] {
        signal_hook::flag::register(signal, Arc::clone(&term))?;
    }

    let shutdown_timeout = cfg.shutdown_timeout;
    let api = api::build_runtime(cfg, storage.clone())?;
    info!(addr = %api.local_addr(), "TaskStore listening");

    while !term.load(Ordering::Acquire) {
        std::thread::sleep(SIGNAL_POLL);
    }

    info!(timeout = ?shutdown_timeout, "Shutting down...");
    api.stop(shutdown_timeout);
    info!("TaskStore stopped");
    Ok(())
}

#[cfg(all(test, feature = "e2e"))]
mod e2e_tests;
