// src/main.rs

//! The main entry point for the crawler daemon: load configuration, stand up
//! the cache/queue/fetcher/processor stack, and run one worker per crawler
//! bucket offset until shutdown.

use anyhow::{Context as _, Result};
use crawlcore::cache::Cache;
use crawlcore::config::Config;
use crawlcore::context::Context;
use crawlcore::driver;
use crawlcore::fetcher::Fetcher;
use crawlcore::policy::Policy;
use crawlcore::processor::NullProcessor;
use crawlcore::queue::{Queue, SqlQueue};
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("crawlcore {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!(version = VERSION, "starting crawlcore");

    if let Err(e) = run_workers(config).await {
        error!("crawler runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Builds the shared stack (cache, queue, fetcher, processor) and runs the
/// single worker bound to this process's `instance.crawler` identity.
async fn run_workers(config: Config) -> Result<()> {
    let cache = Cache::new(config.cache.path.clone());
    let policy = Policy::from_config(&config.policy);
    let fetcher = Arc::new(
        Fetcher::new(cache, policy, config.fetch.clone(), config.cache.cache_min_secs)
            .context("failed to build http client")?,
    );

    let queue: Arc<dyn Queue> = Arc::new(
        SqlQueue::connect(config.queue.clone())
            .await
            .context("failed to connect to queue database")?
            .with_partition_widths(config.instance.crawlercount, config.instance.cachecount),
    );

    let processor = Arc::new(NullProcessor);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let ctx = Arc::new(Context::new(config.instance.crawler, fetcher, queue, processor));

    let worker_shutdown = shutdown_tx.subscribe();
    let worker = tokio::spawn(driver::run_worker(ctx, worker_shutdown));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested, signalling workers");
    let _ = shutdown_tx.send(());

    worker.await.context("worker task panicked")?;
    info!("crawlcore stopped");
    Ok(())
}
