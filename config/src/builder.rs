// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{
    BigSegmentsConfig, Config, ConfigError, DataSourceMode, EventsConfig, HttpProperties,
    ServiceEndpoints, DEFAULT_INITIAL_RECONNECT_DELAY, DEFAULT_POLL_INTERVAL,
    MIN_DIAGNOSTIC_RECORDING_INTERVAL, MIN_POLL_INTERVAL,
};
use std::{path::PathBuf, time::Duration};
use tracing::warn;
use url::Url;

/// Builder for [`Config`]. Interval floors are enforced at build time: a
/// poll interval below the service minimum is clamped (with a warning), as is
/// the diagnostic recording interval.
pub struct ConfigBuilder {
    sdk_key: String,
    streaming_base: Option<String>,
    polling_base: Option<String>,
    events_base: Option<String>,
    mode: DataSourceMode,
    initial_reconnect_delay: Duration,
    poll_interval: Duration,
    events: EventsConfig,
    big_segments: BigSegmentsConfig,
    http: HttpProperties,
    proxy: Option<String>,
    log_evaluation_errors: bool,
    log_context_key_in_errors: bool,
}

impl ConfigBuilder {
    pub fn new(sdk_key: impl Into<String>) -> Self {
        Self {
            sdk_key: sdk_key.into(),
            streaming_base: None,
            polling_base: None,
            events_base: None,
            mode: DataSourceMode::Streaming,
            initial_reconnect_delay: DEFAULT_INITIAL_RECONNECT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            events: EventsConfig::default(),
            big_segments: BigSegmentsConfig::default(),
            http: HttpProperties::default(),
            proxy: None,
            log_evaluation_errors: true,
            log_context_key_in_errors: false,
        }
    }

    pub fn streaming_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.streaming_base = Some(uri.into());
        self
    }

    pub fn polling_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.polling_base = Some(uri.into());
        self
    }

    pub fn events_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.events_base = Some(uri.into());
        self
    }

    pub fn mode(mut self, mode: DataSourceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.initial_reconnect_delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.events.flush_interval = interval;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.events.capacity = capacity;
        self
    }

    pub fn context_keys_capacity(mut self, capacity: usize) -> Self {
        self.events.context_keys_capacity = capacity;
        self
    }

    pub fn context_keys_flush_interval(mut self, interval: Duration) -> Self {
        self.events.context_keys_flush_interval = interval;
        self
    }

    pub fn all_attributes_private(mut self, private: bool) -> Self {
        self.events.all_attributes_private = private;
        self
    }

    pub fn private_attribute(mut self, name: impl Into<String>) -> Self {
        self.events.private_attributes.push(name.into());
        self
    }

    pub fn inline_users_in_events(mut self, inline: bool) -> Self {
        self.events.inline_users_in_events = inline;
        self
    }

    pub fn diagnostic_opt_out(mut self, opt_out: bool) -> Self {
        self.events.diagnostic_opt_out = opt_out;
        self
    }

    pub fn diagnostic_recording_interval(mut self, interval: Duration) -> Self {
        self.events.diagnostic_recording_interval = interval;
        self
    }

    pub fn big_segments(mut self, big_segments: BigSegmentsConfig) -> Self {
        self.big_segments = big_segments;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.http.connect_timeout = timeout;
        self
    }

    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    pub fn ca_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.http.ca_certificate_path = Some(path.into());
        self
    }

    pub fn wrapper(mut self, name: impl Into<String>, version: Option<String>) -> Self {
        self.http.wrapper_name = Some(name.into());
        self.http.wrapper_version = version;
        self
    }

    pub fn log_evaluation_errors(mut self, log: bool) -> Self {
        self.log_evaluation_errors = log;
        self
    }

    pub fn log_context_key_in_errors(mut self, log: bool) -> Self {
        self.log_context_key_in_errors = log;
        self
    }

    pub fn build(mut self) -> Result<Config, ConfigError> {
        if self.mode != DataSourceMode::Offline {
            if self.sdk_key.is_empty() {
                return Err(ConfigError::EmptySdkKey);
            }
            if !self
                .sdk_key
                .bytes()
                .all(|b| b.is_ascii_graphic() || b == b' ')
            {
                return Err(ConfigError::InvalidSdkKey);
            }
        }

        if self.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "poll interval of {:?} is below the service minimum, using {:?}",
                self.poll_interval, MIN_POLL_INTERVAL
            );
            self.poll_interval = MIN_POLL_INTERVAL;
        }
        if self.events.diagnostic_recording_interval < MIN_DIAGNOSTIC_RECORDING_INTERVAL {
            self.events.diagnostic_recording_interval = MIN_DIAGNOSTIC_RECORDING_INTERVAL;
        }

        if let Some(proxy) = &self.proxy {
            self.http.proxy = Some(
                Url::parse(proxy).map_err(|e| ConfigError::InvalidProxy(proxy.clone(), e))?,
            );
        }

        let endpoints = ServiceEndpoints::new(
            self.streaming_base.as_deref(),
            self.polling_base.as_deref(),
            self.events_base.as_deref(),
        )?;

        Ok(Config {
            sdk_key: self.sdk_key,
            endpoints,
            mode: self.mode,
            initial_reconnect_delay: self.initial_reconnect_delay,
            poll_interval: self.poll_interval,
            events: self.events,
            big_segments: self.big_segments,
            http: self.http,
            log_evaluation_errors: self.log_evaluation_errors,
            log_context_key_in_errors: self.log_context_key_in_errors,
        })
    }
}
