//! Proxy scraping and scheduling
//!
//! This module provides functionality for:
//! - Fetching plain-text proxy lists from public sources
//! - Parsing list lines into candidate proxies
//! - Running the periodic scrape cycle that feeds the verification topic

pub mod fetcher;
pub mod parser;
pub mod scheduler;
pub mod sources;

pub use fetcher::{FetchError, Fetcher, SourceFetcher};
pub use parser::{parse_line, parse_listing, ParseError};
pub use scheduler::{Pruner, Scheduler, Scraper};
pub use sources::{public_sources, Source};

use crate::events::ProxyDiscoveredEvent;
use crate::proxy::Protocol;

/// A candidate parsed from a source line. Never persisted; it only travels
/// from the fetcher to the verification topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedProxy {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
    pub source: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ScrapedProxy {
    /// Canonical `ip:port` form used for cross-source deduplication.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// The wire event published to the verification topic.
    pub fn to_event(&self) -> ProxyDiscoveredEvent {
        ProxyDiscoveredEvent {
            ip: self.ip.clone(),
            port: self.port,
            protocol: self.protocol,
            source: self.source.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Render back to the source-list line format.
    pub fn to_line(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}:{}:{}", self.ip, self.port, user, pass),
            _ => format!("{}:{}", self.ip, self.port),
        }
    }
}
