// target.rs - Target normalization and reachability check

use regex::Regex;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::{Result, ScanError};
use crate::http::{HttpTransport, ProbeRequest};

lazy_static::lazy_static! {
    static ref SCHEME_PREFIX: Regex = Regex::new(r"(?i)^https?://").unwrap();
}

/// Validated base URL of a scan target: scheme, host and optional port, no path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    root: Url,
}

impl Target {
    /// Accepts `example.com`, `http://example.com/path`, `example.com:8443` ...
    /// and always yields `https://host[:port]`.
    pub fn normalize(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let without_scheme = SCHEME_PREFIX.replace(trimmed, "");
        let authority = without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();

        if authority.is_empty() {
            return Err(ScanError::InvalidTarget(input.to_string()));
        }

        let url = Url::parse(&format!("https://{}/", authority))
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", input, e)))?;
        Self::from_url(url)
    }

    /// Keeps the scheme of `url`. Plain http is only reachable through here.
    pub fn from_url(url: Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| ScanError::InvalidTarget(url.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScanError::InvalidTarget(url.to_string()));
        }

        let root_text = match url.port() {
            Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
            None => format!("{}://{}/", url.scheme(), host),
        };
        let root = Url::parse(&root_text).map_err(|e| ScanError::InvalidTarget(e.to_string()))?;
        Ok(Self { root })
    }

    /// Root URL with a trailing `/`
    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Base URL without trailing slash, e.g. `https://example.com`
    pub fn base(&self) -> String {
        self.root.as_str().trim_end_matches('/').to_string()
    }

    pub fn host(&self) -> &str {
        self.root.host_str().unwrap_or_default()
    }

    /// `host` or `host:port`
    pub fn netloc(&self) -> String {
        match self.root.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// Directory-safe name for per-target output
    pub fn dir_name(&self) -> String {
        self.netloc().replace([':', '[', ']'], "_")
    }

    /// Same host and explicit port as the target. The scheme is ignored, so a plain
    /// `http://host/path` link still belongs to an https target.
    pub fn in_scope(&self, url: &Url) -> bool {
        url.host_str()
            .map(|h| h.eq_ignore_ascii_case(self.host()))
            .unwrap_or(false)
            && url.port() == self.root.port()
    }

    /// HEAD the root following redirects; any 2xx/3xx answer counts as reachable.
    pub async fn validate(&self, transport: &dyn HttpTransport, timeout: Duration) -> Result<u16> {
        let request = ProbeRequest::head(self.base(), timeout).following_redirects();
        let response = transport
            .fetch(request)
            .await
            .map_err(|e| ScanError::Unreachable {
                url: self.base(),
                reason: e.to_string(),
            })?;

        if (200..400).contains(&response.status) {
            Ok(response.status)
        } else {
            Err(ScanError::Unreachable {
                url: self.base(),
                reason: format!("status {}", response.status),
            })
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub::{unreachable, StubTransport};
    use crate::http::ProbeResult;

    #[test]
    fn test_normalize_forces_https() {
        let target = Target::normalize("http://Example.com/some/path?x=1").unwrap();
        assert_eq!(target.base(), "https://example.com");
        assert_eq!(target.netloc(), "example.com");
    }

    #[test]
    fn test_normalize_keeps_port() {
        let target = Target::normalize("  example.com:8443 ").unwrap();
        assert_eq!(target.base(), "https://example.com:8443");
        assert_eq!(target.dir_name(), "example.com_8443");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["example.com", "HTTPS://a.example.com:8080/x", "http://10.0.0.1", "b.example.org/"] {
            let once = Target::normalize(input).unwrap();
            let twice = Target::normalize(&once.base()).unwrap();
            assert_eq!(once, twice, "input {}", input);
        }
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(Target::normalize("").is_err());
        assert!(Target::normalize("https://").is_err());
    }

    #[test]
    fn test_in_scope() {
        let target = Target::normalize("example.com").unwrap();
        assert!(target.in_scope(&Url::parse("https://example.com/admin").unwrap()));
        assert!(target.in_scope(&Url::parse("https://EXAMPLE.com:443/").unwrap()));
        assert!(!target.in_scope(&Url::parse("https://evil.com/").unwrap()));
        assert!(!target.in_scope(&Url::parse("https://example.com:8443/").unwrap()));
        assert!(target.in_scope(&Url::parse("http://example.com/account").unwrap()));

        let with_port = Target::normalize("example.com:8443").unwrap();
        assert!(with_port.in_scope(&Url::parse("http://example.com:8443/x").unwrap()));
        assert!(!with_port.in_scope(&Url::parse("https://example.com/x").unwrap()));
    }

    #[tokio::test]
    async fn test_validate() {
        let target = Target::normalize("example.com").unwrap();

        let ok = StubTransport::new(|req| Ok(ProbeResult::new(&req.url, 301)));
        assert_eq!(target.validate(&ok, Duration::from_secs(1)).await.unwrap(), 301);
        assert!(ok.requests()[0].follow_redirects);

        let broken = StubTransport::new(|req| Ok(ProbeResult::new(&req.url, 503)));
        assert!(matches!(
            target.validate(&broken, Duration::from_secs(1)).await,
            Err(ScanError::Unreachable { .. })
        ));

        let down = StubTransport::new(|req| Err(unreachable(req)));
        assert!(target.validate(&down, Duration::from_secs(1)).await.is_err());
    }
}
