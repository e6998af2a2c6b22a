//! API response shapes

use serde::Serialize;

use crate::proxy::Proxy;

#[derive(Debug, Serialize)]
pub struct ProxyResponse {
    pub address: String,
    pub protocol: String,
    pub anonymity: String,
    pub latency_ms: u64,
    pub source: String,
}

impl From<&Proxy> for ProxyResponse {
    fn from(proxy: &Proxy) -> Self {
        Self {
            address: proxy.address(),
            protocol: proxy.protocol.to_string(),
            anonymity: proxy.anonymity.to_string(),
            latency_ms: proxy.latency_ms,
            source: proxy.source.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse {
    pub data: Vec<ProxyResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub limit: i64,
    pub total_count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Anonymity, Protocol};
    use std::time::Duration;

    #[test]
    fn test_proxy_response_fields() {
        let mut proxy = Proxy::new("1.2.3.4", 8080, Protocol::Socks5, "list-a");
        proxy.mark_success(Duration::from_millis(120), Anonymity::Elite);

        let response = ProxyResponse::from(&proxy);
        assert_eq!(response.address, "1.2.3.4:8080");
        assert_eq!(response.protocol, "socks5");
        assert_eq!(response.anonymity, "elite");
        assert_eq!(response.latency_ms, 120);
        assert_eq!(response.source, "list-a");
    }

    #[test]
    fn test_paginated_response_omits_terminal_cursor() {
        let response = PaginatedResponse {
            data: Vec::new(),
            next_cursor: None,
            limit: 25,
            total_count: 0,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("next_cursor"));
    }
}
