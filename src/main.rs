use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use proxy_engine::config::Config;
use proxy_engine::scraper::{public_sources, Fetcher, Scheduler, Scraper};
use proxy_engine::store::ProxyStore;
use proxy_engine::stream::StreamsClient;
use proxy_engine::verifier::{Checker, VerifierWorker, DEFAULT_GROUP};
use proxy_engine::{api, Result};

/// Distributed proxy discovery, verification, and serving pipeline
#[derive(Parser)]
#[command(name = "proxy-engine")]
#[command(about = "Distributed proxy discovery, verification, and serving pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the read API
    Api,
    /// Run the scrape scheduler
    Scheduler,
    /// Run a verifier worker
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let shutdown = shutdown_channel();

    match cli.command {
        Commands::Api => run_api(config, shutdown).await,
        Commands::Scheduler => run_scheduler(config, shutdown).await,
        Commands::Worker => run_worker(config, shutdown).await,
    }
}

/// Receiver that flips to true on SIGINT or SIGTERM.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn connect_redis(config: &Config) -> Result<(redis::Client, redis::aio::ConnectionManager)> {
    let client = redis::Client::open(config.redis_url()).context("open redis client")?;
    let mut conn = redis::aio::ConnectionManager::new(client.clone())
        .await
        .context("connect to redis")?;
    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .context("ping redis")?;
    info!(addr = %config.redis_addr, "connected to redis");
    Ok((client, conn))
}

async fn run_api(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let (_client, conn) = connect_redis(&config).await?;
    let store = ProxyStore::new(conn, config.key_prefix.clone()).with_ttl(config.proxy_ttl);
    api::serve(store, config.api_port, shutdown).await
}

async fn run_scheduler(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let (client, conn) = connect_redis(&config).await?;
    let publisher = Arc::new(StreamsClient::new(client, conn.clone()));
    let store = Arc::new(ProxyStore::new(conn, config.key_prefix.clone()).with_ttl(config.proxy_ttl));
    let fetcher = Arc::new(Fetcher::new(config.source_timeout)?);

    let scraper = Scraper::new(fetcher, public_sources(), config.source_timeout);
    let scheduler = Scheduler::new(
        scraper,
        publisher,
        store,
        config.topic_verify.clone(),
        config.scrape_interval,
    );

    scheduler.run(shutdown).await;
    Ok(())
}

async fn run_worker(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let (client, conn) = connect_redis(&config).await?;
    let consumer = Arc::new(StreamsClient::new(client, conn.clone()));
    let store = Arc::new(ProxyStore::new(conn, config.key_prefix.clone()).with_ttl(config.proxy_ttl));
    let checker = Arc::new(Checker::new(
        config.verify_target_url.clone(),
        config.verify_timeout,
    )?);

    let worker = VerifierWorker::new(
        consumer,
        checker,
        store,
        config.topic_verify.clone(),
        DEFAULT_GROUP,
        config.consumer_name.clone(),
        config.verify_concurrency,
    );

    worker.run(shutdown).await
}
