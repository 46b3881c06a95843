// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use beacon_config::{HttpProperties, SDK_USER_AGENT, WRAPPER_HEADER};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;
use tracing::warn;

/// Builds a reqwest client honoring the shared HTTP properties. Streaming
/// connections pass `read_timeout = None` so the stream can idle between
/// events; request/response clients set one.
pub fn build_client(
    sdk_key: &str,
    props: &HttpProperties,
    read_timeout: Option<Duration>,
) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    if let Ok(mut auth) = HeaderValue::from_str(sdk_key) {
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
    }
    if let Some(wrapper) = props.wrapper_header() {
        if let Ok(value) = HeaderValue::from_str(&wrapper) {
            headers.insert(WRAPPER_HEADER, value);
        }
    }

    let mut builder = reqwest::Client::builder()
        .user_agent(SDK_USER_AGENT)
        .connect_timeout(props.connect_timeout)
        .default_headers(headers);
    if let Some(timeout) = read_timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(proxy_url) = &props.proxy {
        match reqwest::Proxy::all(proxy_url.as_str()) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(error) => warn!("ignoring invalid proxy configuration: {}", error),
        }
    }
    if let Some(path) = &props.ca_certificate_path {
        match std::fs::read(path).map_err(anyhow::Error::from).and_then(|pem| {
            reqwest::Certificate::from_pem(&pem).map_err(anyhow::Error::from)
        }) {
            Ok(certificate) => builder = builder.add_root_certificate(certificate),
            Err(error) => warn!(
                "ignoring unreadable CA certificate {:?}: {}",
                path, error
            ),
        }
    }

    builder.build().unwrap_or_else(|error| {
        // Falling back to a default client keeps the SDK alive; the worst
        // case is that custom TLS/proxy settings are not applied.
        warn!("failed to build configured HTTP client: {}", error);
        reqwest::Client::new()
    })
}

/// Whether an HTTP error status can be retried. 400-level statuses are
/// permanent except for timeout and rate-limit; everything 500-level is
/// transient.
pub fn is_recoverable_status(status: reqwest::StatusCode) -> bool {
    if status.is_server_error() {
        return true;
    }
    matches!(status.as_u16(), 408 | 429)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_recoverable_statuses() {
        assert!(is_recoverable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_recoverable_status(StatusCode::BAD_GATEWAY));
        assert!(is_recoverable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_recoverable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_recoverable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_recoverable_status(StatusCode::FORBIDDEN));
        assert!(!is_recoverable_status(StatusCode::NOT_FOUND));
        assert!(!is_recoverable_status(StatusCode::BAD_REQUEST));
    }
}
