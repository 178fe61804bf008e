//! SSRF-hardened outbound HTTP for the oracle processor and price-feed
//! engine: both fetch user-templated URLs, so every request is validated
//! against a hostname/DNS/private-IP allowlist before it leaves the
//! process, mirroring the teacher's own URL validation style.

use std::collections::HashMap;
use std::net::IpAddr;

use service_core::error::EngineError;
use url::Url;

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn is_safe_url_hostname(url: &Url) -> bool {
    if url.scheme() != "https" {
        return false;
    }
    let Some(host) = url.host_str() else { return false };
    let host = host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") || host.ends_with(".localhost") {
        return false;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return !is_private_ip(&ip);
    }
    true
}

/// Parses, checks scheme/hostname, then resolves DNS and checks every
/// resolved address — guards against DNS rebinding, not just a literal
/// private-IP hostname.
pub async fn validate_outbound_url(url_str: &str) -> Result<Url, EngineError> {
    let url = Url::parse(url_str).map_err(|e| EngineError::Validation(format!("invalid URL `{url_str}`: {e}")))?;
    if !is_safe_url_hostname(&url) {
        return Err(EngineError::Validation(format!("URL `{url_str}` targets a disallowed host")));
    }
    let host = url.host_str().ok_or_else(|| EngineError::Validation("URL has no host".to_owned()))?;
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| EngineError::TransientRemote(format!("DNS resolution failed for `{host}`: {e}")))?;
    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(EngineError::Validation(format!("URL `{url_str}` resolves to a disallowed address")));
        }
    }
    Ok(url)
}

/// Executes a GET (or POST, if `body` is set) with a per-request timeout
/// already configured on `client`, returning the raw response body. Non-2xx
/// responses are rejected with the body as the error message (spec.md
/// §4.2 step 2).
pub async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    body: Option<String>,
    headers: &HashMap<String, String>,
) -> Result<String, EngineError> {
    let mut builder = match &body {
        Some(b) => client.post(url).body(b.clone()),
        None => client.get(url),
    };
    for (k, v) in headers {
        builder = builder.header(k, v);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| EngineError::TransientRemote(format!("request to `{url}` failed: {e}")))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| EngineError::TransientRemote(format!("failed reading response body from `{url}`: {e}")))?;

    if !status.is_success() {
        return Err(EngineError::PermanentRemote(text));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_https_scheme() {
        let err = validate_outbound_url("http://example.com/price").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_loopback_hostname() {
        let err = validate_outbound_url("https://127.0.0.1/price").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_internal_suffix() {
        let err = validate_outbound_url("https://api.internal/price").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
