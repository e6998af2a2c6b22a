//! Proxy list line parser
//!
//! Source lists are plain text, one proxy per line:
//! - `IP:PORT`
//! - `IP:PORT:USER:PASS`
//!
//! Blank lines and `#` comments are skipped; anything else that fails to
//! parse is dropped with a debug log.

use std::net::IpAddr;

use tracing::debug;

use super::sources::Source;
use super::ScrapedProxy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid format: {0:?}")]
    InvalidFormat(String),
    #[error("invalid ip: {0:?}")]
    InvalidIp(String),
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}

/// Parse a single non-blank, non-comment line.
pub fn parse_line(line: &str, source: &Source) -> Result<ScrapedProxy, ParseError> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 2 && parts.len() != 4 {
        return Err(ParseError::InvalidFormat(line.to_string()));
    }

    let ip = parts[0].trim();
    if ip.parse::<IpAddr>().is_err() {
        return Err(ParseError::InvalidIp(ip.to_string()));
    }

    let port_str = parts[1].trim();
    let port: u16 = port_str
        .parse()
        .map_err(|_| ParseError::InvalidPort(port_str.to_string()))?;
    if port == 0 {
        return Err(ParseError::InvalidPort(port_str.to_string()));
    }

    let (username, password) = if parts.len() == 4 {
        (
            Some(parts[2].trim().to_string()),
            Some(parts[3].trim().to_string()),
        )
    } else {
        (None, None)
    };

    Ok(ScrapedProxy {
        ip: ip.to_string(),
        port,
        protocol: source.protocol,
        source: source.name.clone(),
        username,
        password,
    })
}

/// Parse a whole listing body, dropping unparseable lines.
pub fn parse_listing(content: &str, source: &Source) -> Vec<ScrapedProxy> {
    let mut proxies = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line, source) {
            Ok(proxy) => proxies.push(proxy),
            Err(err) => debug!(source = %source.name, line, error = %err, "dropped line"),
        }
    }
    proxies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Protocol;

    fn source() -> Source {
        Source::new("test-list", "https://example.com/proxies.txt", Protocol::Http)
    }

    #[test]
    fn test_parse_simple_format() {
        let proxy = parse_line("192.168.1.1:8080", &source()).unwrap();
        assert_eq!(proxy.ip, "192.168.1.1");
        assert_eq!(proxy.port, 8080);
        assert_eq!(proxy.protocol, Protocol::Http);
        assert_eq!(proxy.source, "test-list");
        assert!(proxy.username.is_none());
    }

    #[test]
    fn test_parse_auth_format() {
        let proxy = parse_line("192.168.1.1:8080:user:pass", &source()).unwrap();
        assert_eq!(proxy.username.as_deref(), Some("user"));
        assert_eq!(proxy.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_parse_rejects_bad_ip() {
        assert_eq!(
            parse_line("999.999.999.999:8080", &source()),
            Err(ParseError::InvalidIp("999.999.999.999".to_string()))
        );
        assert_eq!(
            parse_line("not-an-ip:8080", &source()),
            Err(ParseError::InvalidIp("not-an-ip".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(matches!(
            parse_line("192.168.1.1:0", &source()),
            Err(ParseError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_line("192.168.1.1:70000", &source()),
            Err(ParseError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_line("192.168.1.1:abc", &source()),
            Err(ParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(matches!(
            parse_line("192.168.1.1", &source()),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_line("a:b:c", &source()),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_listing_skips_comments_and_blanks() {
        let content = "1.2.3.4:8080\n#comment\n\n5.6.7.8:3128:u:p";
        let proxies = parse_listing(content, &source());
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].address(), "1.2.3.4:8080");
        assert_eq!(proxies[1].address(), "5.6.7.8:3128");
        assert_eq!(proxies[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_listing_round_trip_is_idempotent() {
        let content = "1.2.3.4:8080\n#comment\n\n5.6.7.8:3128:u:p";
        let first = parse_listing(content, &source());

        let rendered: String = first
            .iter()
            .map(ScrapedProxy::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        let second = parse_listing(&rendered, &source());

        assert_eq!(first, second);
    }
}
