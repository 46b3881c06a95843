// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use std::{path::PathBuf, time::Duration};
use url::Url;

pub const SDK_USER_AGENT: &str = concat!("BeaconServerClient/", env!("CARGO_PKG_VERSION"));

/// Header carrying the wrapper identification on every outbound request.
pub const WRAPPER_HEADER: &str = "X-LaunchDarkly-Wrapper";

/// HTTP behavior shared by every outbound client the SDK creates.
#[derive(Clone, Debug)]
pub struct HttpProperties {
    pub connect_timeout: Duration,
    pub proxy: Option<Url>,
    /// Additional root certificate, for proxies or private service
    /// deployments with their own CA.
    pub ca_certificate_path: Option<PathBuf>,
    /// Set by wrapper SDKs built on top of this one, reported upstream in a
    /// header for support diagnostics.
    pub wrapper_name: Option<String>,
    pub wrapper_version: Option<String>,
}

impl Default for HttpProperties {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            proxy: None,
            ca_certificate_path: None,
            wrapper_name: None,
            wrapper_version: None,
        }
    }
}

impl HttpProperties {
    /// The `X-LaunchDarkly-Wrapper` header value: `name` or `name/version`.
    pub fn wrapper_header(&self) -> Option<String> {
        match (&self.wrapper_name, &self.wrapper_version) {
            (Some(name), Some(version)) => Some(format!("{}/{}", name, version)),
            (Some(name), None) => Some(name.clone()),
            _ => None,
        }
    }
}
