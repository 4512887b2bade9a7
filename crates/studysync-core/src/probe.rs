//! HTTP HEAD probe of a remote dependency.
//!
//! Uses the curl crate (libcurl). Failures come back as [`RemoteFailure`] so
//! the retry classifier can tell a refused connection from a 404.

use std::str;
use std::time::{Duration, Instant};

use crate::retry::RemoteFailure;

/// Outcome of a successful (2xx) HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub elapsed: Duration,
}

/// Performs a HEAD request, following redirects.
///
/// Blocks the current thread; use [`probe_async`] from async code.
pub fn probe(url: &str, timeout: Duration) -> Result<ProbeResult, RemoteFailure> {
    let started = Instant::now();
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.connect_timeout(timeout.min(Duration::from_secs(15)))?;
    easy.timeout(timeout)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    let status = u16::try_from(code).unwrap_or(0);
    if !(200..300).contains(&status) {
        return Err(RemoteFailure::http(status, format!("HEAD {url} returned HTTP {code}")));
    }

    let (content_type, content_length) = parse_headers(&headers);
    Ok(ProbeResult {
        url: url.to_string(),
        status,
        content_type,
        content_length,
        elapsed: started.elapsed(),
    })
}

/// [`probe`] on the blocking pool.
pub async fn probe_async(url: String, timeout: Duration) -> Result<ProbeResult, RemoteFailure> {
    tokio::task::spawn_blocking(move || probe(&url, timeout))
        .await
        .map_err(|e| RemoteFailure::message(format!("probe task failed: {e}")))?
}

/// Content-Type and Content-Length of the last response in `lines`
/// (redirect hops each contribute a header block).
fn parse_headers(lines: &[String]) -> (Option<String>, Option<u64>) {
    let mut content_type = None;
    let mut content_length = None;
    for line in lines {
        let line = line.trim();
        if line.starts_with("HTTP/") {
            content_type = None;
            content_length = None;
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok();
        }
    }
    (content_type, content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_type_and_length() {
        let (ct, len) = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Type: application/json",
            "content-length: 42",
            "",
        ]));
        assert_eq!(ct.as_deref(), Some("application/json"));
        assert_eq!(len, Some(42));
    }

    #[test]
    fn only_final_response_counts() {
        let (ct, len) = parse_headers(&lines(&[
            "HTTP/1.1 301 Moved Permanently",
            "Content-Length: 0",
            "Content-Type: text/html",
            "",
            "HTTP/2 200",
            "content-type: text/plain",
        ]));
        assert_eq!(ct.as_deref(), Some("text/plain"));
        assert_eq!(len, None);
    }

    #[test]
    fn unreachable_host_is_a_retryable_failure() {
        let err = probe("http://127.0.0.1:1/", Duration::from_secs(2)).unwrap_err();
        assert!(crate::retry::is_retryable(&err, &crate::retry::RetryConfig::default()));
    }
}
