//! Proxy Engine - distributed proxy discovery, verification, and serving
//!
//! The pipeline runs as three cooperating processes sharing a Redis instance:
//! - A scheduler that scrapes public proxy lists and publishes discovery
//!   events to a durable stream.
//! - A verifier worker that drains the stream, probes each candidate through
//!   itself, and persists the survivors with a freshness TTL.
//! - A read API that serves the live set with cursor pagination, filtering,
//!   and random selection.

pub mod api;
pub mod config;
pub mod events;
pub mod proxy;
pub mod scraper;
pub mod store;
pub mod stream;
pub mod verifier;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
