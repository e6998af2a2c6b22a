//! Wire events exchanged over the durable stream

use serde::{Deserialize, Serialize};

use crate::proxy::{Protocol, Proxy};

/// Discovery event carried on the verification topic.
///
/// The auth fields are optional on the wire; consumers tolerate their
/// absence so older producers keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDiscoveredEvent {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyDiscoveredEvent {
    /// Build the in-memory candidate the verifier probes. Anonymity starts
    /// unknown with zero failure state.
    pub fn into_proxy(self) -> Proxy {
        Proxy::new(self.ip, self.port, self.protocol, self.source)
    }
}
