//! Durable stream over Redis Streams
//!
//! A topic is an append-only log with named consumer groups. Delivery is
//! at-least-once: entries delivered to a consumer stay pending until acked
//! and are replayed, in id order, when the same consumer resubscribes.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Approximate topic length cap applied on every publish.
pub const DEFAULT_MAX_LEN: usize = 1_000_000;

const RECOVERY_BATCH: usize = 100;
const LIVE_BATCH: usize = 10;
const READ_BLOCK: Duration = Duration::from_secs(5);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A single delivered stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append a payload to the topic, returning the assigned entry id.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, StreamError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Open an infinite, cancellable sequence of messages for `consumer`
    /// within `group`. Previously delivered but unacked entries drain first.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Message>, StreamError>;

    /// Remove a delivered entry from this group's pending list.
    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), StreamError>;
}

/// Redis Streams client shared by producers and consumers.
#[derive(Clone)]
pub struct StreamsClient {
    client: redis::Client,
    conn: ConnectionManager,
    max_len: usize,
}

impl StreamsClient {
    pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
        Self {
            client,
            conn,
            max_len: DEFAULT_MAX_LEN,
        }
    }

    pub async fn connect(url: &str) -> Result<Self, StreamError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self::new(client, conn))
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(topic, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            // An existing group is fine; any other error is not.
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Publisher for StreamsClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(
                topic,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[("payload", payload)],
            )
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl Consumer for StreamsClient {
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Message>, StreamError> {
        self.create_group(topic, group).await?;

        // Blocking reads get a dedicated connection; on the shared
        // multiplexed one they would queue acks behind XREADGROUP.
        let read_conn = ConnectionManager::new(self.client.clone()).await?;

        let (tx, rx) = mpsc::channel(LIVE_BATCH);
        let reader = StreamReader {
            conn: read_conn,
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        };
        tokio::spawn(reader.run(tx, shutdown));

        Ok(rx)
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let _acked: u64 = conn.xack(topic, group, &[id]).await?;
        Ok(())
    }
}

struct StreamReader {
    conn: ConnectionManager,
    topic: String,
    group: String,
    consumer: String,
}

impl StreamReader {
    async fn run(mut self, tx: mpsc::Sender<Message>, mut shutdown: watch::Receiver<bool>) {
        if self.recover_pending(&tx, &mut shutdown).await {
            self.consume_live(&tx, &mut shutdown).await;
        }
        debug!(topic = %self.topic, consumer = %self.consumer, "stream reader closed");
    }

    /// Drain entries delivered to this consumer before a restart. Returns
    /// false when the subscriber went away mid-drain.
    async fn recover_pending(
        &mut self,
        tx: &mpsc::Sender<Message>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }

            let opts = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(RECOVERY_BATCH);
            let reply: Result<Option<StreamReadReply>, redis::RedisError> = self
                .conn
                .xread_options(&[&self.topic], &["0"], &opts)
                .await;

            let messages = match reply {
                Ok(reply) => flatten_reply(reply),
                Err(err) => {
                    warn!(topic = %self.topic, error = %err, "recovery read failed");
                    if !self.backoff(shutdown).await {
                        return false;
                    }
                    continue;
                }
            };

            if messages.is_empty() {
                return true;
            }

            for msg in messages {
                if !send_message(tx, shutdown, msg).await {
                    return false;
                }
            }
        }
    }

    async fn consume_live(&mut self, tx: &mpsc::Sender<Message>, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let opts = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(LIVE_BATCH)
                .block(READ_BLOCK.as_millis() as usize);
            let topics = [&self.topic];
            let ids: [&str; 1] = [">"];
            let read = self
                .conn
                .xread_options::<_, _, Option<StreamReadReply>>(&topics, &ids, &opts);

            let reply = tokio::select! {
                _ = shutdown.changed() => return,
                reply = read => reply,
            };

            let messages = match reply {
                Ok(reply) => flatten_reply(reply),
                Err(err) => {
                    warn!(topic = %self.topic, error = %err, "live read failed");
                    if !self.backoff(shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            for msg in messages {
                if !send_message(tx, shutdown, msg).await {
                    return;
                }
            }
        }
    }

    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown.changed() => false,
            _ = tokio::time::sleep(ERROR_BACKOFF) => true,
        }
    }
}

async fn send_message(
    tx: &mpsc::Sender<Message>,
    shutdown: &mut watch::Receiver<bool>,
    msg: Message,
) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        sent = tx.send(msg) => sent.is_ok(),
    }
}

/// Flatten an XREADGROUP reply into messages, id order preserved. Entries
/// without a `payload` field are skipped.
fn flatten_reply(reply: Option<StreamReadReply>) -> Vec<Message> {
    let Some(reply) = reply else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            let Some(value) = entry.map.get("payload") else {
                continue;
            };
            let Ok(payload) = redis::from_redis_value::<Vec<u8>>(value) else {
                continue;
            };
            messages.push(Message {
                id: entry.id,
                payload,
            });
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::streams::{StreamId, StreamKey};
    use std::collections::HashMap;

    fn entry(id: &str, payload: Option<&[u8]>) -> StreamId {
        let mut map = HashMap::new();
        if let Some(payload) = payload {
            map.insert("payload".to_string(), redis::Value::Data(payload.to_vec()));
        }
        StreamId {
            id: id.to_string(),
            map,
        }
    }

    fn reply(ids: Vec<StreamId>) -> Option<StreamReadReply> {
        Some(StreamReadReply {
            keys: vec![StreamKey {
                key: "proxies:verify".to_string(),
                ids,
            }],
        })
    }

    #[test]
    fn test_flatten_reply_preserves_order() {
        let messages = flatten_reply(reply(vec![
            entry("1-0", Some(b"a")),
            entry("2-0", Some(b"b")),
            entry("3-0", Some(b"c")),
        ]));

        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["1-0", "2-0", "3-0"]);
        assert_eq!(messages[1].payload, b"b");
    }

    #[test]
    fn test_flatten_reply_skips_entries_without_payload() {
        let messages = flatten_reply(reply(vec![
            entry("1-0", Some(b"a")),
            entry("2-0", None),
            entry("3-0", Some(b"c")),
        ]));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, "3-0");
    }

    #[test]
    fn test_flatten_reply_handles_block_expiry() {
        assert!(flatten_reply(None).is_empty());
        assert!(flatten_reply(Some(StreamReadReply { keys: Vec::new() })).is_empty());
    }

    #[tokio::test]
    async fn test_send_message_stops_on_receiver_drop() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        drop(rx);

        let delivered = send_message(
            &tx,
            &mut shutdown_rx,
            Message {
                id: "1-0".to_string(),
                payload: b"x".to_vec(),
            },
        )
        .await;
        assert!(!delivered);
    }
}
