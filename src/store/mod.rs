//! Proxy store over Redis sorted sets
//!
//! Each proxy lives in a TTL'd record keyed by address, mirrored into five
//! sorted indices: `alive`, per-protocol, per-anonymity, a composite of the
//! two (scores are expiration unix seconds), and a latency index whose score
//! is the measured latency in milliseconds.

use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::proxy::{Anonymity, Protocol, Proxy};

/// Default freshness TTL for a verified proxy.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

const SCAN_PAGE: usize = 100;
const SWEEP_PAGE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("proxy record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no proxies available")]
    NoProxiesAvailable,
}

/// Filter applied to alive queries. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterOptions {
    pub protocol: Option<Protocol>,
    pub anonymity: Option<Anonymity>,
    pub max_latency: Option<Duration>,
}

impl FilterOptions {
    /// Residual check against the deserialized record. Indices are updated
    /// on save, but an older index entry may point at a record whose
    /// attributes have since changed.
    pub fn matches(&self, proxy: &Proxy) -> bool {
        if let Some(protocol) = self.protocol {
            if proxy.protocol != protocol {
                return false;
            }
        }
        if let Some(anonymity) = self.anonymity {
            if proxy.anonymity != anonymity {
                return false;
            }
        }
        if let Some(max_latency) = self.max_latency {
            if proxy.latency_ms > max_latency.as_millis() as u64 {
                return false;
            }
        }
        true
    }
}

/// One page of an alive query.
#[derive(Debug, Default)]
pub struct Page {
    pub proxies: Vec<Proxy>,
    /// Score of the last index entry on a full page, 0 when terminal.
    pub next_cursor: f64,
    /// Unexpired entries in the selected index, before residual filtering.
    pub total: u64,
}

/// Key layout under the configured prefix.
#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn data(&self, addr: &str) -> String {
        format!("{}:data:{}", self.prefix, addr)
    }

    pub fn alive(&self) -> String {
        format!("{}:idx:alive", self.prefix)
    }

    pub fn protocol(&self, protocol: Protocol) -> String {
        format!("{}:idx:proto:{}", self.prefix, protocol)
    }

    pub fn anonymity(&self, anonymity: Anonymity) -> String {
        format!("{}:idx:anon:{}", self.prefix, anonymity)
    }

    pub fn composite(&self, protocol: Protocol, anonymity: Anonymity) -> String {
        format!("{}:idx:proto:{}:anon:{}", self.prefix, protocol, anonymity)
    }

    pub fn latency(&self) -> String {
        format!("{}:idx:latency", self.prefix)
    }

    pub fn index_pattern(&self) -> String {
        format!("{}:idx:*", self.prefix)
    }

    /// Narrowest index serving the filter: composite when both attributes
    /// are set, the single-attribute index otherwise, `alive` as fallback.
    pub fn index_for(&self, filter: &FilterOptions) -> String {
        match (filter.protocol, filter.anonymity) {
            (Some(protocol), Some(anonymity)) => self.composite(protocol, anonymity),
            (Some(protocol), None) => self.protocol(protocol),
            (None, Some(anonymity)) => self.anonymity(anonymity),
            (None, None) => self.alive(),
        }
    }
}

/// Store client. Cheap to clone; all mutations are single pipelined batches.
#[derive(Clone)]
pub struct ProxyStore {
    conn: ConnectionManager,
    keys: KeySchema,
    ttl: Duration,
}

impl ProxyStore {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            keys: KeySchema::new(key_prefix),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Write the record with its TTL and upsert the address into all five
    /// indices in one pipelined batch. Overwrites existing entries.
    pub async fn save(&self, proxy: &Proxy) -> Result<(), StoreError> {
        let addr = proxy.address();
        let record = serde_json::to_string(proxy)?;
        let expire_at = (Utc::now().timestamp() as u64 + self.ttl.as_secs()) as f64;

        let mut pipe = redis::pipe();
        pipe.cmd("SET")
            .arg(self.keys.data(&addr))
            .arg(&record)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .ignore();
        pipe.zadd(self.keys.alive(), &addr, expire_at).ignore();
        pipe.zadd(self.keys.protocol(proxy.protocol), &addr, expire_at)
            .ignore();
        pipe.zadd(self.keys.anonymity(proxy.anonymity), &addr, expire_at)
            .ignore();
        pipe.zadd(
            self.keys.composite(proxy.protocol, proxy.anonymity),
            &addr,
            expire_at,
        )
        .ignore();
        pipe.zadd(self.keys.latency(), &addr, proxy.latency_ms as f64)
            .ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Cursor-ranged query over the narrowest index for the filter.
    ///
    /// `limit <= 0` returns every unexpired entry. The cursor is a score:
    /// pages resume strictly after it, so forward iteration stays monotonic
    /// across concurrent index mutations.
    pub async fn get_alive(
        &self,
        cursor: f64,
        limit: i64,
        filter: &FilterOptions,
    ) -> Result<Page, StoreError> {
        let index = self.keys.index_for(filter);
        let now = Utc::now().timestamp() as f64;
        let mut conn = self.conn.clone();

        let total: u64 = conn.zcount(&index, now, "+inf").await?;

        let min = if cursor > 0.0 {
            format!("({}", cursor.max(now))
        } else {
            format!("{now}")
        };
        let mut range = redis::cmd("ZRANGEBYSCORE");
        range.arg(&index).arg(&min).arg("+inf").arg("WITHSCORES");
        if limit > 0 {
            range.arg("LIMIT").arg(0).arg(limit);
        }
        let entries: Vec<(String, f64)> = range.query_async(&mut conn).await?;

        if entries.is_empty() {
            return Ok(Page {
                proxies: Vec::new(),
                next_cursor: 0.0,
                total,
            });
        }

        let data_keys: Vec<String> = entries.iter().map(|(addr, _)| self.keys.data(addr)).collect();
        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&data_keys)
            .query_async(&mut conn)
            .await?;

        let mut proxies = Vec::with_capacity(entries.len());
        // Index entries can outlive their record; absent records are the
        // expected TTL race and are skipped, never retried.
        for record in records.into_iter().flatten() {
            let Ok(proxy) = serde_json::from_str::<Proxy>(&record) else {
                continue;
            };
            if filter.matches(&proxy) {
                proxies.push(proxy);
            }
        }

        Ok(Page {
            next_cursor: next_cursor(limit, &entries),
            proxies,
            total,
        })
    }

    /// Uniform random pick over the full filtered set.
    pub async fn random(&self, filter: &FilterOptions) -> Result<Proxy, StoreError> {
        let mut page = self.get_alive(0.0, 0, filter).await?;
        if page.proxies.is_empty() {
            return Err(StoreError::NoProxiesAvailable);
        }
        let index = OsRng.gen_range(0..page.proxies.len());
        Ok(page.proxies.swap_remove(index))
    }

    /// Remove expired members from every expiration-scored index, then sweep
    /// the latency index by record existence (its scores are milliseconds,
    /// not timestamps, so a score cutoff would be meaningless there).
    pub async fn prune_expired(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let index_keys = self.scan_index_keys(&mut conn).await?;

        let latency_key = self.keys.latency();
        let now = Utc::now().timestamp() as f64;
        let mut removed = 0u64;

        let expiry_keys: Vec<&String> = index_keys.iter().filter(|key| **key != latency_key).collect();
        if !expiry_keys.is_empty() {
            let mut pipe = redis::pipe();
            for key in &expiry_keys {
                pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg("-inf").arg(now);
            }
            let counts: Vec<u64> = pipe.query_async(&mut conn).await?;
            removed += counts.into_iter().sum::<u64>();
        }

        removed += self.sweep_latency_index(&mut conn).await?;
        debug!(removed, "pruned expired index entries");
        Ok(removed)
    }

    async fn scan_index_keys(&self, conn: &mut ConnectionManager) -> Result<Vec<String>, StoreError> {
        let pattern = self.keys.index_pattern();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE)
                .query_async(conn)
                .await?;
            keys.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    /// Drop latency-index members whose data record no longer exists.
    async fn sweep_latency_index(&self, conn: &mut ConnectionManager) -> Result<u64, StoreError> {
        let key = self.keys.latency();

        let mut members: Vec<String> = Vec::new();
        let mut offset = 0isize;
        loop {
            let page: Vec<String> = conn
                .zrange(&key, offset, offset + SWEEP_PAGE as isize - 1)
                .await?;
            let page_len = page.len();
            members.extend(page);
            if page_len < SWEEP_PAGE {
                break;
            }
            offset += SWEEP_PAGE as isize;
        }

        let mut removed = 0u64;
        for chunk in members.chunks(SWEEP_PAGE) {
            let mut pipe = redis::pipe();
            for addr in chunk {
                pipe.cmd("EXISTS").arg(self.keys.data(addr));
            }
            let exists: Vec<bool> = pipe.query_async(conn).await?;

            let dead: Vec<&String> = chunk
                .iter()
                .zip(&exists)
                .filter(|(_, alive)| !**alive)
                .map(|(addr, _)| addr)
                .collect();
            if !dead.is_empty() {
                let count: u64 = conn.zrem(&key, dead).await?;
                removed += count;
            }
        }
        Ok(removed)
    }
}

/// A page is full when `limit` entries came back; the last index score is
/// then the resume point. Anything else terminates the iteration.
fn next_cursor(limit: i64, entries: &[(String, f64)]) -> f64 {
    if limit > 0 && entries.len() as i64 == limit {
        entries.last().map(|(_, score)| *score).unwrap_or(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(protocol: Protocol, anonymity: Anonymity, latency_ms: u64) -> Proxy {
        let mut proxy = Proxy::new("1.2.3.4", 8080, protocol, "test");
        proxy.mark_success(Duration::from_millis(latency_ms), anonymity);
        proxy
    }

    #[test]
    fn test_key_schema_layout() {
        let keys = KeySchema::new("proxies");
        assert_eq!(keys.data("1.2.3.4:8080"), "proxies:data:1.2.3.4:8080");
        assert_eq!(keys.alive(), "proxies:idx:alive");
        assert_eq!(keys.protocol(Protocol::Socks5), "proxies:idx:proto:socks5");
        assert_eq!(keys.anonymity(Anonymity::Elite), "proxies:idx:anon:elite");
        assert_eq!(
            keys.composite(Protocol::Http, Anonymity::Anonymous),
            "proxies:idx:proto:http:anon:anonymous"
        );
        assert_eq!(keys.latency(), "proxies:idx:latency");
        assert_eq!(keys.index_pattern(), "proxies:idx:*");
    }

    #[test]
    fn test_index_selection_narrowest_first() {
        let keys = KeySchema::new("proxies");

        let both = FilterOptions {
            protocol: Some(Protocol::Http),
            anonymity: Some(Anonymity::Elite),
            ..Default::default()
        };
        assert_eq!(keys.index_for(&both), "proxies:idx:proto:http:anon:elite");

        let protocol_only = FilterOptions {
            protocol: Some(Protocol::Socks4),
            ..Default::default()
        };
        assert_eq!(keys.index_for(&protocol_only), "proxies:idx:proto:socks4");

        let anonymity_only = FilterOptions {
            anonymity: Some(Anonymity::Anonymous),
            ..Default::default()
        };
        assert_eq!(keys.index_for(&anonymity_only), "proxies:idx:anon:anonymous");

        assert_eq!(keys.index_for(&FilterOptions::default()), "proxies:idx:alive");
    }

    #[test]
    fn test_filter_matches_protocol_and_anonymity() {
        let proxy = verified(Protocol::Http, Anonymity::Elite, 120);

        assert!(FilterOptions::default().matches(&proxy));
        assert!(FilterOptions {
            protocol: Some(Protocol::Http),
            anonymity: Some(Anonymity::Elite),
            ..Default::default()
        }
        .matches(&proxy));

        assert!(!FilterOptions {
            protocol: Some(Protocol::Socks5),
            ..Default::default()
        }
        .matches(&proxy));
        assert!(!FilterOptions {
            anonymity: Some(Anonymity::Transparent),
            ..Default::default()
        }
        .matches(&proxy));
    }

    #[test]
    fn test_filter_matches_max_latency() {
        let proxy = verified(Protocol::Http, Anonymity::Elite, 900);

        let generous = FilterOptions {
            max_latency: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(generous.matches(&proxy));

        let strict = FilterOptions {
            max_latency: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(!strict.matches(&proxy));
    }

    #[test]
    fn test_next_cursor_full_page() {
        let entries = vec![
            ("1.1.1.1:80".to_string(), 100.0),
            ("2.2.2.2:80".to_string(), 200.0),
        ];
        assert_eq!(next_cursor(2, &entries), 200.0);
    }

    #[test]
    fn test_next_cursor_terminal_cases() {
        let entries = vec![("1.1.1.1:80".to_string(), 100.0)];
        // Short page: the set is exhausted.
        assert_eq!(next_cursor(2, &entries), 0.0);
        // Unlimited query never paginates.
        assert_eq!(next_cursor(0, &entries), 0.0);
        assert_eq!(next_cursor(-1, &entries), 0.0);
    }
}
