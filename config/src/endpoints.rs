// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ConfigError, DEFAULT_EVENTS_BASE_URI, DEFAULT_POLL_BASE_URI, DEFAULT_STREAM_BASE_URI,
};
use url::Url;

/// Base URIs for the three service endpoints. Whether each one was customized
/// is kept alongside so the diagnostic payload can report it.
#[derive(Clone, Debug)]
pub struct ServiceEndpoints {
    streaming: Url,
    polling: Url,
    events: Url,
    custom_streaming: bool,
    custom_polling: bool,
    custom_events: bool,
}

fn parse_base(uri: &str) -> Result<Url, ConfigError> {
    // A trailing slash would defeat Url::join for the fixed request paths.
    let trimmed = uri.trim_end_matches('/');
    Url::parse(trimmed).map_err(|e| ConfigError::InvalidUri(uri.to_string(), e))
}

impl ServiceEndpoints {
    pub fn new(
        streaming: Option<&str>,
        polling: Option<&str>,
        events: Option<&str>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            streaming: parse_base(streaming.unwrap_or(DEFAULT_STREAM_BASE_URI))?,
            polling: parse_base(polling.unwrap_or(DEFAULT_POLL_BASE_URI))?,
            events: parse_base(events.unwrap_or(DEFAULT_EVENTS_BASE_URI))?,
            custom_streaming: streaming.is_some(),
            custom_polling: polling.is_some(),
            custom_events: events.is_some(),
        })
    }

    pub fn streaming_base(&self) -> &Url {
        &self.streaming
    }

    pub fn polling_base(&self) -> &Url {
        &self.polling
    }

    pub fn events_base(&self) -> &Url {
        &self.events
    }

    pub fn is_custom_streaming(&self) -> bool {
        self.custom_streaming
    }

    pub fn is_custom_polling(&self) -> bool {
        self.custom_polling
    }

    pub fn is_custom_events(&self) -> bool {
        self.custom_events
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self::new(None, None, None).expect("default endpoint URIs are valid")
    }
}
