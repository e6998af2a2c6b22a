//! Source fetcher
//!
//! Fetches one plain-text proxy list over HTTP and yields the parsed
//! candidates. Bodies are capped at 10 MiB; a misbehaving source cannot
//! balloon a scrape cycle.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};

use super::parser::parse_listing;
use super::sources::Source;
use super::ScrapedProxy;

/// User agent sent on every outbound request, scrapes and probes alike.
pub const USER_AGENT: &str = "ProxyEngine/1.0";

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source {source_name}: status {status}")]
    SourceUnavailable {
        source_name: String,
        status: StatusCode,
    },
    #[error("source {source}: {error}")]
    Http {
        source: String,
        #[source]
        error: reqwest::Error,
    },
}

/// Per-source fetch seam; the scheduler fans out over this.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_and_parse(&self, source: &Source) -> Result<Vec<ScrapedProxy>, FetchError>;
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for Fetcher {
    async fn fetch_and_parse(&self, source: &Source) -> Result<Vec<ScrapedProxy>, FetchError> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|error| FetchError::Http {
                source: source.name.clone(),
                error,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::SourceUnavailable {
                source_name: source.name.clone(),
                status,
            });
        }

        let body = read_capped(response, MAX_BODY_BYTES)
            .await
            .map_err(|error| FetchError::Http {
                source: source.name.clone(),
                error,
            })?;

        Ok(parse_listing(&body, source))
    }
}

/// Read at most `cap` bytes of the response body.
async fn read_capped(response: reqwest::Response, cap: usize) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunks = response.bytes_stream();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let remaining = cap - buf.len();
        if chunk.len() >= remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}
