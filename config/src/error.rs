// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors detected while building a [`crate::Config`]. These fail client
/// construction; nothing is retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SDK key must not be empty")]
    EmptySdkKey,

    #[error("SDK key contains non-ASCII or control characters")]
    InvalidSdkKey,

    #[error("invalid base URI {0:?}: {1}")]
    InvalidUri(String, #[source] url::ParseError),

    #[error("invalid proxy URL {0:?}: {1}")]
    InvalidProxy(String, #[source] url::ParseError),
}
