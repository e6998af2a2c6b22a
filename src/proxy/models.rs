//! Proxy data models

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base cooldown applied after the first consecutive failure, doubled on
/// each subsequent one.
const BACKOFF_BASE_MINUTES: i64 = 5;

/// Shift cap so the exponential backoff cannot overflow.
const BACKOFF_MAX_SHIFT: u32 = 24;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown protocol: {0}")]
pub struct UnknownProtocol(String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "socks4" => Ok(Protocol::Socks4),
            "socks5" => Ok(Protocol::Socks5),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

/// Anonymity tier by observed header leakage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
    #[default]
    Unknown,
}

impl Anonymity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anonymity::Transparent => "transparent",
            Anonymity::Anonymous => "anonymous",
            Anonymity::Elite => "elite",
            Anonymity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown anonymity level: {0}")]
pub struct UnknownAnonymity(String);

impl FromStr for Anonymity {
    type Err = UnknownAnonymity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transparent" => Ok(Anonymity::Transparent),
            "anonymous" => Ok(Anonymity::Anonymous),
            "elite" => Ok(Anonymity::Elite),
            "unknown" => Ok(Anonymity::Unknown),
            other => Err(UnknownAnonymity(other.to_string())),
        }
    }
}

/// Proxy model representing a single verified or candidate proxy
///
/// Identity is `(ip, port)`; the canonical `"{ip}:{port}"` form returned by
/// [`Proxy::address`] is the primary key everywhere the record is indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
    pub anonymity: Anonymity,
    pub source: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub latency_ms: u64,
    pub fail_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Proxy {
    /// Create a fresh candidate. Anonymity stays unknown until the first
    /// successful verification.
    pub fn new(ip: impl Into<String>, port: u16, protocol: Protocol, source: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port,
            protocol,
            anonymity: Anonymity::Unknown,
            source: source.into(),
            first_seen_at: Utc::now(),
            last_check_at: None,
            latency_ms: 0,
            fail_count: 0,
            cooldown_until: None,
        }
    }

    /// Canonical `ip:port` form, the primary key in all indices.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Proxy URL usable as an upstream for an HTTP client.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.ip, self.port)
    }

    /// Whether the cooldown window from the last failure has elapsed.
    pub fn is_ready(&self) -> bool {
        match self.cooldown_until {
            Some(until) => Utc::now() > until,
            None => true,
        }
    }

    /// Record a successful check: all failure state is cleared and the
    /// measured latency and classified anonymity are stamped.
    pub fn mark_success(&mut self, latency: Duration, anonymity: Anonymity) {
        self.fail_count = 0;
        self.cooldown_until = None;
        self.last_check_at = Some(Utc::now());
        self.latency_ms = latency.as_millis() as u64;
        self.anonymity = anonymity;
    }

    /// Record a failed check: the cooldown doubles with every consecutive
    /// failure (5, 10, 20, ... minutes).
    pub fn mark_failure(&mut self) {
        self.fail_count += 1;
        let now = Utc::now();
        self.last_check_at = Some(now);

        let shift = (self.fail_count.max(1) - 1).min(BACKOFF_MAX_SHIFT);
        let minutes = BACKOFF_BASE_MINUTES << shift;
        self.cooldown_until = Some(now + chrono::Duration::minutes(minutes));
    }
}
