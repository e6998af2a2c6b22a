//! Scrape cycle scheduler
//!
//! Fans out to every source in parallel, deduplicates by address, publishes
//! one discovery event per unique candidate, and prunes the store at the end
//! of each cycle. Cycles never overlap; the ticker waits for the current one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::fetcher::SourceFetcher;
use super::sources::Source;
use super::ScrapedProxy;
use crate::store::{ProxyStore, StoreError};
use crate::stream::Publisher;

/// Store cleanup hook invoked after publishing.
#[async_trait]
pub trait Pruner: Send + Sync {
    async fn prune_expired(&self) -> Result<u64, StoreError>;
}

#[async_trait]
impl Pruner for ProxyStore {
    async fn prune_expired(&self) -> Result<u64, StoreError> {
        ProxyStore::prune_expired(self).await
    }
}

/// Parallel fetch across all sources with per-source timeout budgets.
pub struct Scraper<F> {
    fetcher: Arc<F>,
    sources: Vec<Source>,
    source_timeout: Duration,
}

impl<F: SourceFetcher + 'static> Scraper<F> {
    pub fn new(fetcher: Arc<F>, sources: Vec<Source>, source_timeout: Duration) -> Self {
        Self {
            fetcher,
            sources,
            source_timeout,
        }
    }

    /// Fetch every source concurrently and deduplicate by `ip:port`,
    /// last writer wins. Returns the unique candidates and how many
    /// sources failed.
    pub async fn scrape(&self) -> (Vec<ScrapedProxy>, usize) {
        let mut tasks = Vec::with_capacity(self.sources.len());
        for source in self.sources.clone() {
            let fetcher = Arc::clone(&self.fetcher);
            let budget = self.source_timeout;
            tasks.push(tokio::spawn(async move {
                match tokio::time::timeout(budget, fetcher.fetch_and_parse(&source)).await {
                    Ok(Ok(proxies)) => {
                        debug!(source = %source.name, count = proxies.len(), "source fetched");
                        Some(proxies)
                    }
                    Ok(Err(err)) => {
                        warn!(source = %source.name, error = %err, "source fetch failed");
                        None
                    }
                    Err(_) => {
                        warn!(source = %source.name, "source fetch timed out");
                        None
                    }
                }
            }));
        }

        let mut unique: HashMap<String, ScrapedProxy> = HashMap::new();
        let mut failed = 0usize;
        for task in tasks {
            match task.await {
                Ok(Some(proxies)) => {
                    for proxy in proxies {
                        unique.insert(proxy.address(), proxy);
                    }
                }
                _ => failed += 1,
            }
        }

        (unique.into_values().collect(), failed)
    }
}

pub struct Scheduler<F, P, R> {
    scraper: Scraper<F>,
    publisher: Arc<P>,
    pruner: Arc<R>,
    topic: String,
    interval: Duration,
}

impl<F, P, R> Scheduler<F, P, R>
where
    F: SourceFetcher + 'static,
    P: Publisher,
    R: Pruner,
{
    pub fn new(
        scraper: Scraper<F>,
        publisher: Arc<P>,
        pruner: Arc<R>,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            scraper,
            publisher,
            pruner,
            topic: topic.into(),
            interval,
        }
    }

    /// Run an immediate first cycle, then tick at the configured interval
    /// until shutdown. A shutdown mid-cycle lets the cycle finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), topic = %self.topic, "scheduler started");

        self.run_cycle().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a fresh interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = ticker.tick() => self.run_cycle().await,
            }
        }
    }

    /// One scrape cycle: fetch, dedup, publish serially, prune.
    pub async fn run_cycle(&self) {
        info!("starting scrape cycle");

        let (proxies, failed_sources) = self.scraper.scrape().await;
        if failed_sources > 0 {
            warn!(count = failed_sources, "sources failed this cycle");
        }

        let mut published = 0usize;
        for scraped in &proxies {
            let payload = match serde_json::to_vec(&scraped.to_event()) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(address = %scraped.address(), error = %err, "failed to serialize discovery event");
                    continue;
                }
            };
            match self.publisher.publish(&self.topic, payload).await {
                Ok(_) => published += 1,
                Err(err) => {
                    warn!(address = %scraped.address(), error = %err, "failed to publish discovery event");
                }
            }
        }

        info!(scraped = proxies.len(), published, "scrape cycle complete");

        match self.pruner.prune_expired().await {
            Ok(removed) => info!(removed, "prune complete"),
            Err(err) => warn!(error = %err, "prune failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Protocol;
    use crate::scraper::fetcher::FetchError;
    use crate::stream::{Publisher, StreamError};
    use std::sync::Mutex;

    fn scraped(ip: &str, port: u16, source: &str) -> ScrapedProxy {
        ScrapedProxy {
            ip: ip.to_string(),
            port,
            protocol: Protocol::Http,
            source: source.to_string(),
            username: None,
            password: None,
        }
    }

    /// Fetcher returning a canned list per source name.
    struct FakeFetcher {
        by_source: HashMap<String, Vec<ScrapedProxy>>,
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch_and_parse(&self, source: &Source) -> Result<Vec<ScrapedProxy>, FetchError> {
            match self.by_source.get(&source.name) {
                Some(proxies) => Ok(proxies.clone()),
                None => Err(FetchError::SourceUnavailable {
                    source_name: source.name.clone(),
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, _topic: &str, payload: Vec<u8>) -> Result<String, StreamError> {
            if self.fail {
                return Err(StreamError::Redis(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "connection refused",
                ))));
            }
            let mut published = self.published.lock().unwrap();
            published.push(payload);
            Ok(format!("{}-0", published.len()))
        }
    }

    #[derive(Default)]
    struct CountingPruner {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Pruner for CountingPruner {
        async fn prune_expired(&self) -> Result<u64, StoreError> {
            *self.calls.lock().unwrap() += 1;
            Ok(0)
        }
    }

    fn test_sources(names: &[&str]) -> Vec<Source> {
        names
            .iter()
            .map(|name| Source::new(name, "https://example.com/list.txt", Protocol::Http))
            .collect()
    }

    #[tokio::test]
    async fn test_scrape_deduplicates_across_sources() {
        let mut by_source = HashMap::new();
        by_source.insert("a".to_string(), vec![scraped("1.1.1.1", 8080, "a")]);
        by_source.insert(
            "b".to_string(),
            vec![scraped("1.1.1.1", 8080, "b"), scraped("2.2.2.2", 3128, "b")],
        );
        let scraper = Scraper::new(
            Arc::new(FakeFetcher { by_source }),
            test_sources(&["a", "b"]),
            Duration::from_secs(5),
        );

        let (proxies, failed) = scraper.scrape().await;
        assert_eq!(failed, 0);

        let mut addresses: Vec<_> = proxies.iter().map(ScrapedProxy::address).collect();
        addresses.sort();
        assert_eq!(addresses, ["1.1.1.1:8080", "2.2.2.2:3128"]);
    }

    #[tokio::test]
    async fn test_scrape_counts_failed_sources() {
        let mut by_source = HashMap::new();
        by_source.insert("good".to_string(), vec![scraped("1.1.1.1", 8080, "good")]);
        let scraper = Scraper::new(
            Arc::new(FakeFetcher { by_source }),
            test_sources(&["good", "down"]),
            Duration::from_secs(5),
        );

        let (proxies, failed) = scraper.scrape().await;
        assert_eq!(proxies.len(), 1);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_unique_events_and_prunes() {
        let mut by_source = HashMap::new();
        by_source.insert("a".to_string(), vec![scraped("1.1.1.1", 8080, "a")]);
        by_source.insert(
            "b".to_string(),
            vec![scraped("1.1.1.1", 8080, "b"), scraped("2.2.2.2", 3128, "b")],
        );
        let scraper = Scraper::new(
            Arc::new(FakeFetcher { by_source }),
            test_sources(&["a", "b"]),
            Duration::from_secs(5),
        );

        let publisher = Arc::new(RecordingPublisher::default());
        let pruner = Arc::new(CountingPruner::default());
        let scheduler = Scheduler::new(
            scraper,
            Arc::clone(&publisher),
            Arc::clone(&pruner),
            "proxies:verify",
            Duration::from_secs(3600),
        );

        scheduler.run_cycle().await;

        assert_eq!(publisher.published.lock().unwrap().len(), 2);
        assert_eq!(*pruner.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_cycle_survives_publish_failures() {
        let mut by_source = HashMap::new();
        by_source.insert("a".to_string(), vec![scraped("1.1.1.1", 8080, "a")]);
        let scraper = Scraper::new(
            Arc::new(FakeFetcher { by_source }),
            test_sources(&["a"]),
            Duration::from_secs(5),
        );

        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let pruner = Arc::new(CountingPruner::default());
        let scheduler = Scheduler::new(
            scraper,
            publisher,
            Arc::clone(&pruner),
            "proxies:verify",
            Duration::from_secs(3600),
        );

        scheduler.run_cycle().await;

        // The cycle still reaches the prune step.
        assert_eq!(*pruner.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scraper = Scraper::new(
            Arc::new(FakeFetcher {
                by_source: HashMap::new(),
            }),
            Vec::new(),
            Duration::from_secs(5),
        );
        let scheduler = Scheduler::new(
            scraper,
            Arc::new(RecordingPublisher::default()),
            Arc::new(CountingPruner::default()),
            "proxies:verify",
            Duration::from_secs(3600),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler exits on shutdown")
            .unwrap();
    }
}
