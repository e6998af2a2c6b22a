//! Proxy probe and anonymity classification
//!
//! A probe routes a GET through the candidate to a known introspection
//! endpoint and inspects the echoed request. The response must match the
//! endpoint's schema and must not carry headers the proxy injected; a
//! baseline response fetched once without a proxy anchors that comparison.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Proxy as Upstream, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::proxy::{Anonymity, Proxy};
use crate::scraper::fetcher::USER_AGENT;

pub const DEFAULT_TARGET_URL: &str = "https://httpbin.org/get";

/// A legitimate introspection response is ~300 bytes; anything past this is
/// carrying extra content.
const MAX_PAYLOAD_BYTES: usize = 2048;

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level keys of the introspection endpoint's schema.
static EXPECTED_FIELDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["args", "headers", "origin", "url"]));

/// Headers that reveal the request went through a proxy.
const LEAK_HEADERS: [&str; 6] = [
    "X-Forwarded-For",
    "X-Real-Ip",
    "X-Client-Ip",
    "Forwarded",
    "Client-Ip",
    "Via",
];

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("proxy timeout")]
    Timeout,
    #[error("proxy dead: status {0}")]
    Dead(StatusCode),
    #[error("proxy transport: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("probe client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("payload modified by proxy")]
    PayloadModified,
    #[error("probe response is not valid json")]
    InvalidResponse,
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub latency: Duration,
    pub anonymity: Anonymity,
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, proxy: &Proxy) -> Result<ProbeReport, VerifyError>;
}

pub struct Checker {
    target_url: String,
    timeout: Duration,
    /// Direct client for the real-ip and baseline bootstrap requests.
    bootstrap: Client,
    real_ip: OnceCell<Option<String>>,
    baseline: OnceCell<Option<Value>>,
}

impl Checker {
    pub fn new(target_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let bootstrap = Client::builder()
            .timeout(BOOTSTRAP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            target_url: target_url.into(),
            timeout,
            bootstrap,
            real_ip: OnceCell::new(),
            baseline: OnceCell::new(),
        })
    }

    /// The process's egress IP as seen by the endpoint, fetched once.
    async fn real_ip(&self) -> Option<String> {
        self.real_ip
            .get_or_init(|| async {
                match self.fetch_real_ip().await {
                    Ok(ip) => {
                        info!(ip = %ip, "detected real ip");
                        Some(ip)
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to fetch real ip");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn fetch_real_ip(&self) -> crate::Result<String> {
        #[derive(Deserialize)]
        struct OriginOnly {
            origin: String,
        }

        let response: OriginOnly = self
            .bootstrap
            .get(&self.target_url)
            .send()
            .await?
            .json()
            .await?;
        Ok(response.origin)
    }

    /// Expected response body fetched once without a proxy.
    async fn baseline(&self) -> Option<Value> {
        self.baseline
            .get_or_init(|| async {
                match self.fetch_baseline().await {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(error = %err, "failed to fetch baseline");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn fetch_baseline(&self) -> crate::Result<Value> {
        let body = self
            .bootstrap
            .get(&self.target_url)
            .send()
            .await?
            .bytes()
            .await?;
        let value: Value = serde_json::from_slice(&body)?;

        let digest = Sha256::digest(&body);
        let hash: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        info!(hash = &hash[..16], "baseline cached");

        Ok(value)
    }
}

#[async_trait]
impl Prober for Checker {
    async fn probe(&self, proxy: &Proxy) -> Result<ProbeReport, VerifyError> {
        let real_ip = self.real_ip().await;
        let baseline = self.baseline().await;

        let upstream = Upstream::all(proxy.url()).map_err(VerifyError::Client)?;
        // One probe, one connection: idle pooling is disabled so the
        // measured latency always includes the dial.
        let client = Client::builder()
            .proxy(upstream)
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(VerifyError::Client)?;

        let start = Instant::now();
        let response = client
            .get(&self.target_url)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(VerifyError::Dead(status));
        }

        let body = response.bytes().await.map_err(classify_transport)?;
        let latency = start.elapsed();

        let payload = check_integrity(&body, baseline.as_ref())?;
        let anonymity = classify_anonymity(&payload, real_ip.as_deref());

        Ok(ProbeReport { latency, anonymity })
    }
}

fn classify_transport(err: reqwest::Error) -> VerifyError {
    if err.is_timeout() {
        VerifyError::Timeout
    } else {
        VerifyError::Transport(err)
    }
}

/// Validate the echoed response against the endpoint schema and the
/// baseline, returning the parsed body.
pub fn check_integrity(body: &[u8], baseline: Option<&Value>) -> Result<Value, VerifyError> {
    if body.len() > MAX_PAYLOAD_BYTES {
        return Err(VerifyError::PayloadModified);
    }

    let payload: Value =
        serde_json::from_slice(body).map_err(|_| VerifyError::InvalidResponse)?;
    let Some(object) = payload.as_object() else {
        return Err(VerifyError::InvalidResponse);
    };

    for key in object.keys() {
        if !EXPECTED_FIELDS.contains(key.as_str()) {
            return Err(VerifyError::PayloadModified);
        }
    }

    if let Some(baseline_headers) = baseline.and_then(|b| b.get("headers")).and_then(Value::as_object) {
        if let Some(probe_headers) = object.get("headers").and_then(Value::as_object) {
            for key in probe_headers.keys() {
                if baseline_headers.contains_key(key) {
                    continue;
                }
                let lower = key.to_ascii_lowercase();
                if lower.starts_with("x-") || lower.contains("inject") || lower.contains("ad") {
                    return Err(VerifyError::PayloadModified);
                }
            }
        }
    }

    Ok(payload)
}

/// Classify anonymity from the echoed headers and the process's real IP.
pub fn classify_anonymity(payload: &Value, real_ip: Option<&str>) -> Anonymity {
    let Some(headers) = payload.get("headers").and_then(Value::as_object) else {
        return Anonymity::Unknown;
    };

    let mut leak_header_present = false;
    for name in LEAK_HEADERS {
        let Some(value) = headers.get(name).and_then(Value::as_str) else {
            continue;
        };
        leak_header_present = true;

        if let Some(real_ip) = real_ip {
            if !real_ip.is_empty() && value.contains(real_ip) {
                return Anonymity::Transparent;
            }
        }
    }

    if leak_header_present {
        Anonymity::Anonymous
    } else {
        Anonymity::Elite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REAL_IP: &str = "203.0.113.7";

    fn baseline() -> Value {
        json!({
            "args": {},
            "headers": {
                "Accept": "*/*",
                "Host": "httpbin.org",
                "User-Agent": USER_AGENT,
            },
            "origin": REAL_IP,
            "url": "https://httpbin.org/get",
        })
    }

    #[test]
    fn test_classify_elite_without_leak_headers() {
        let payload = json!({"headers": {}, "origin": "198.51.100.1"});
        assert_eq!(classify_anonymity(&payload, Some(REAL_IP)), Anonymity::Elite);
    }

    #[test]
    fn test_classify_anonymous_with_leak_header_no_real_ip() {
        let payload = json!({"headers": {"Via": "1.1 proxy"}});
        assert_eq!(
            classify_anonymity(&payload, Some(REAL_IP)),
            Anonymity::Anonymous
        );
    }

    #[test]
    fn test_classify_transparent_when_real_ip_leaks() {
        let payload = json!({"headers": {"X-Forwarded-For": format!("{REAL_IP}, 10.0.0.1")}});
        assert_eq!(
            classify_anonymity(&payload, Some(REAL_IP)),
            Anonymity::Transparent
        );
    }

    #[test]
    fn test_classify_unknown_without_headers_map() {
        let payload = json!({"origin": "198.51.100.1"});
        assert_eq!(classify_anonymity(&payload, Some(REAL_IP)), Anonymity::Unknown);
    }

    #[test]
    fn test_classify_without_known_real_ip_never_transparent() {
        let payload = json!({"headers": {"X-Forwarded-For": REAL_IP}});
        assert_eq!(classify_anonymity(&payload, None), Anonymity::Anonymous);
    }

    #[test]
    fn test_integrity_accepts_schema_subset() {
        let body = serde_json::to_vec(&json!({
            "headers": {"Host": "httpbin.org"},
            "origin": "198.51.100.1",
        }))
        .unwrap();
        assert!(check_integrity(&body, Some(&baseline())).is_ok());
    }

    #[test]
    fn test_integrity_rejects_unexpected_top_level_key() {
        let body = serde_json::to_vec(&json!({
            "headers": {},
            "origin": "198.51.100.1",
            "injected": "<script>",
        }))
        .unwrap();
        assert!(matches!(
            check_integrity(&body, Some(&baseline())),
            Err(VerifyError::PayloadModified)
        ));
    }

    #[test]
    fn test_integrity_rejects_oversized_payload() {
        let padding = "a".repeat(MAX_PAYLOAD_BYTES);
        let body = serde_json::to_vec(&json!({"args": padding})).unwrap();
        assert!(matches!(
            check_integrity(&body, None),
            Err(VerifyError::PayloadModified)
        ));
    }

    #[test]
    fn test_integrity_rejects_injected_suspicious_header() {
        let body = serde_json::to_vec(&json!({
            "headers": {
                "Host": "httpbin.org",
                "X-Ad-Network": "tracker",
            },
            "origin": "198.51.100.1",
        }))
        .unwrap();
        assert!(matches!(
            check_integrity(&body, Some(&baseline())),
            Err(VerifyError::PayloadModified)
        ));
    }

    #[test]
    fn test_integrity_allows_benign_new_header() {
        let body = serde_json::to_vec(&json!({
            "headers": {
                "Host": "httpbin.org",
                "Connection": "close",
            },
            "origin": "198.51.100.1",
        }))
        .unwrap();
        assert!(check_integrity(&body, Some(&baseline())).is_ok());
    }

    #[test]
    fn test_integrity_rejects_non_json() {
        assert!(matches!(
            check_integrity(b"<html>blocked</html>", None),
            Err(VerifyError::InvalidResponse)
        ));
        assert!(matches!(
            check_integrity(b"[1,2,3]", None),
            Err(VerifyError::InvalidResponse)
        ));
    }
}
