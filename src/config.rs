//! Environment configuration
//!
//! Every knob comes from the environment (optionally via a `.env` file) with
//! a default that works against a local Redis.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration shared by the api, scheduler, and worker processes.
#[derive(Debug, Clone)]
pub struct Config {
    /// API listen port
    pub api_port: u16,
    /// Redis endpoint, `host:port`
    pub redis_addr: String,
    pub redis_password: String,
    pub redis_db: i64,
    /// Prefix for every store key
    pub key_prefix: String,
    /// Per-record freshness TTL
    pub proxy_ttl: Duration,
    /// Scheduler period
    pub scrape_interval: Duration,
    /// Per-source fetch budget within a scrape cycle
    pub source_timeout: Duration,
    /// Per-probe timeout in the verifier
    pub verify_timeout: Duration,
    /// Introspection endpoint probed through each candidate
    pub verify_target_url: String,
    /// Concurrent probe cap in the verifier pool
    pub verify_concurrency: usize,
    /// Verification topic name
    pub topic_verify: String,
    /// Stable consumer id within the verifier group
    pub consumer_name: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_port: get_env_parse("API_PORT", 8080),
            redis_addr: get_env("REDIS_ADDR", "localhost:6379"),
            redis_password: get_env("REDIS_PASSWORD", ""),
            redis_db: get_env_parse("REDIS_DB", 0),
            key_prefix: get_env("REDIS_KEY_PREFIX", "proxies"),
            proxy_ttl: Duration::from_secs(get_env_parse("PROXY_TTL_MINUTES", 30u64) * 60),
            scrape_interval: Duration::from_secs(get_env_parse("SCRAPE_INTERVAL_MINUTES", 30u64) * 60),
            source_timeout: Duration::from_secs(get_env_parse("SOURCE_TIMEOUT_SECONDS", 45)),
            verify_timeout: Duration::from_secs(get_env_parse("VERIFY_TIMEOUT_SECONDS", 10)),
            verify_target_url: get_env("VERIFY_TARGET_URL", crate::verifier::DEFAULT_TARGET_URL),
            verify_concurrency: get_env_parse("VERIFY_CONCURRENCY", 50),
            topic_verify: get_env("REDIS_TOPIC_VERIFY", "proxies:verify"),
            consumer_name: get_env("CONSUMER_NAME", &default_consumer_name()),
        }
    }

    /// Connection URL for the redis client.
    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}/{}", self.redis_addr, self.redis_db)
        } else {
            format!("redis://:{}@{}/{}", self.redis_password, self.redis_addr, self.redis_db)
        }
    }
}

fn get_env(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(val) if !val.is_empty() => val,
        _ => fallback.to_string(),
    }
}

fn get_env_parse<T: FromStr + Copy>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(fallback)
}

fn default_consumer_name() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
