//! Controller endpoint parsing
//!
//! Generated bundles need discrete host, port and TLS fields rather than one URL.

use crate::error::{Error, Result};
use url::Url;

/// Host, port and TLS flag of a controller URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ControllerEndpoint {
    /// Render the TLS flag the way collector bundles expect it
    pub fn tls_flag(&self) -> &'static str {
        if self.tls {
            "true"
        } else {
            "false"
        }
    }
}

/// Parse an absolute URL into its endpoint triple
///
/// A missing port falls back to 443 for https and 80 for any other scheme.
pub fn parse(raw: &str) -> Result<ControllerEndpoint> {
    let malformed = |reason: &str| Error::MalformedEndpoint {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(malformed("URL is not set"));
    }

    let url = Url::parse(trimmed).map_err(|e| malformed(&e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(malformed("not an absolute URL"));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| malformed("URL has no host"))?
        .to_string();

    let tls = url.scheme().eq_ignore_ascii_case("https");
    let port = url.port().unwrap_or(if tls { 443 } else { 80 });

    Ok(ControllerEndpoint { host, port, tls })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explicit_port() {
        let ep = parse("https://controller.example.com:8181").unwrap();
        assert_eq!(ep.host, "controller.example.com");
        assert_eq!(ep.port, 8181);
        assert!(ep.tls);
    }

    #[test]
    fn test_parse_default_ports() {
        let ep = parse("https://controller.example.com").unwrap();
        assert_eq!(ep.port, 443);

        let ep = parse("http://controller.example.com/").unwrap();
        assert_eq!(ep.port, 80);
        assert!(!ep.tls);
        assert_eq!(ep.tls_flag(), "false");
    }

    #[test]
    fn test_parse_rejects_relative_and_empty() {
        assert!(matches!(parse(""), Err(Error::MalformedEndpoint { .. })));
        assert!(matches!(
            parse("controller.example.com"),
            Err(Error::MalformedEndpoint { .. })
        ));
        assert!(matches!(
            parse("controller:8090"),
            Err(Error::MalformedEndpoint { .. })
        ));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let ep = parse("  http://10.0.0.5:8090 ").unwrap();
        assert_eq!(ep.host, "10.0.0.5");
        assert_eq!(ep.port, 8090);
    }
}
