use anyhow::{Context, Result};
use std::fmt;

/// Identifies one remote dependency for breaker bookkeeping.
///
/// URLs are normalised down to `(scheme, host, port)` so that every path on
/// the same origin shares one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl DependencyKey {
    /// Construct a key from a URL string.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(url).with_context(|| format!("invalid URL for dependency key: {url}"))?;

        let scheme = parsed.scheme().to_string();
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("URL missing host for dependency key: {url}"))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("URL missing port and unknown default: {url}"))?;

        Ok(Self { scheme, host, port })
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
