//! Verification worker
//!
//! Drains the verification topic under a consumer group and probes each
//! candidate through a bounded pool. Pool submission blocks when full, so
//! consumption slows to probe throughput instead of buffering the stream.
//! Every message is acked exactly once, whatever the probe outcome: a lost
//! result re-appears on the next scrape cycle, unbounded pending growth
//! does not recover by itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use super::checker::Prober;
use crate::events::ProxyDiscoveredEvent;
use crate::proxy::Proxy;
use crate::store::{ProxyStore, StoreError};
use crate::stream::{Consumer, Message};

/// Consumer group shared by all verifier processes.
pub const DEFAULT_GROUP: &str = "verifiers";

const PROGRESS_EVERY: u64 = 100;

/// Persistence seam for verified proxies.
#[async_trait]
pub trait ProxyWriter: Send + Sync {
    async fn save(&self, proxy: &Proxy) -> Result<(), StoreError>;
}

#[async_trait]
impl ProxyWriter for ProxyStore {
    async fn save(&self, proxy: &Proxy) -> Result<(), StoreError> {
        ProxyStore::save(self, proxy).await
    }
}

pub struct VerifierWorker<C, B, W> {
    handler: Arc<Handler<C, B, W>>,
    topic: String,
    group: String,
    consumer_id: String,
    concurrency: usize,
}

impl<C, B, W> VerifierWorker<C, B, W>
where
    C: Consumer + 'static,
    B: Prober + 'static,
    W: ProxyWriter + 'static,
{
    pub fn new(
        consumer: Arc<C>,
        prober: Arc<B>,
        writer: Arc<W>,
        topic: impl Into<String>,
        group: impl Into<String>,
        consumer_id: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        let topic = topic.into();
        let group = group.into();
        Self {
            handler: Arc::new(Handler {
                consumer,
                prober,
                writer,
                topic: topic.clone(),
                group: group.clone(),
                processed: AtomicU64::new(0),
                alive: AtomicU64::new(0),
            }),
            topic,
            group,
            consumer_id: consumer_id.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> crate::Result<()> {
        info!(
            consumer = %self.consumer_id,
            topic = %self.topic,
            group = %self.group,
            concurrency = self.concurrency,
            "verifier started"
        );

        let mut messages = self
            .handler
            .consumer
            .subscribe(&self.topic, &self.group, &self.consumer_id, shutdown)
            .await?;

        let pool = Arc::new(Semaphore::new(self.concurrency));
        while let Some(message) = messages.recv().await {
            // Blocking submission: no slot, no read.
            let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
                break;
            };
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                handler.process(message).await;
                drop(permit);
            });
        }

        // Let in-flight probes finish and ack before reporting.
        let _drain = pool.acquire_many(self.concurrency as u32).await;
        info!(
            processed = self.handler.processed.load(Ordering::Relaxed),
            alive = self.handler.alive.load(Ordering::Relaxed),
            "verifier stopped"
        );
        Ok(())
    }
}

struct Handler<C, B, W> {
    consumer: Arc<C>,
    prober: Arc<B>,
    writer: Arc<W>,
    topic: String,
    group: String,
    processed: AtomicU64,
    alive: AtomicU64,
}

impl<C, B, W> Handler<C, B, W>
where
    C: Consumer,
    B: Prober,
    W: ProxyWriter,
{
    /// Received -> Probing -> (Verified | Failed) -> Persisted | Dropped.
    /// The ack fires on every exit.
    async fn process(&self, message: Message) {
        let event: ProxyDiscoveredEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(id = %message.id, error = %err, "failed to deserialize discovery event");
                self.ack(&message.id).await;
                return;
            }
        };

        let mut proxy = event.into_proxy();
        match self.prober.probe(&proxy).await {
            Ok(report) => {
                proxy.mark_success(report.latency, report.anonymity);
                match self.writer.save(&proxy).await {
                    Ok(()) => {
                        self.alive.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            address = %proxy.address(),
                            latency_ms = proxy.latency_ms,
                            anonymity = %proxy.anonymity,
                            "proxy verified"
                        );
                    }
                    Err(err) => {
                        warn!(address = %proxy.address(), error = %err, "failed to save proxy");
                    }
                }
            }
            Err(err) => {
                proxy.mark_failure();
                debug!(address = %proxy.address(), error = %err, "probe failed");
            }
        }

        self.ack(&message.id).await;

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % PROGRESS_EVERY == 0 {
            info!(
                processed,
                alive = self.alive.load(Ordering::Relaxed),
                "verification progress"
            );
        }
    }

    async fn ack(&self, id: &str) {
        if let Err(err) = self.consumer.ack(&self.topic, &self.group, id).await {
            warn!(id, error = %err, "failed to ack message");
        }
    }
}
