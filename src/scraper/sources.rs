//! Static proxy-list sources

use crate::proxy::Protocol;

/// A plain-text proxy list endpoint with its declared protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub protocol: Protocol,
}

impl Source {
    pub fn new(name: &str, url: &str, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            protocol,
        }
    }
}

/// The built-in set of public sources scraped every cycle.
pub fn public_sources() -> Vec<Source> {
    vec![
        Source::new(
            "TheSpeedX-HTTP",
            "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
            Protocol::Http,
        ),
        Source::new(
            "TheSpeedX-SOCKS5",
            "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
            Protocol::Socks5,
        ),
        Source::new(
            "Monosans-HTTP",
            "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
            Protocol::Http,
        ),
        Source::new(
            "Monosans-SOCKS5",
            "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks5.txt",
            Protocol::Socks5,
        ),
        Source::new(
            "ShiftyTR-HTTP",
            "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
            Protocol::Http,
        ),
        Source::new(
            "ShiftyTR-HTTPS",
            "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/https.txt",
            Protocol::Https,
        ),
        Source::new(
            "ShiftyTR-SOCKS5",
            "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks5.txt",
            Protocol::Socks5,
        ),
        Source::new(
            "Hookzof-SOCKS5",
            "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
            Protocol::Socks5,
        ),
    ]
}
