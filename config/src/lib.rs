// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! SDK configuration. Everything the host can tune lives here; components
//! receive the sub-config they care about at construction time and never read
//! configuration afterwards.

mod builder;
mod endpoints;
mod error;
mod http;

pub use builder::ConfigBuilder;
pub use endpoints::ServiceEndpoints;
pub use error::ConfigError;
pub use http::{HttpProperties, SDK_USER_AGENT, WRAPPER_HEADER};

use std::time::Duration;

pub const DEFAULT_STREAM_BASE_URI: &str = "https://stream.beaconlabs.io";
pub const DEFAULT_POLL_BASE_URI: &str = "https://sdk.beaconlabs.io";
pub const DEFAULT_EVENTS_BASE_URI: &str = "https://events.beaconlabs.io";

pub const DEFAULT_INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = MIN_POLL_INTERVAL;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(900);
pub const MIN_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;
pub const DEFAULT_CONTEXT_KEYS_CAPACITY: usize = 1_000;

/// How the SDK receives flag data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSourceMode {
    /// Long-lived server-sent-event connection (the default).
    Streaming,
    /// Periodic full-dataset fetches.
    Polling,
    /// The data store is populated by something else (typically another
    /// process writing to a shared persistent store); no connection is made.
    ExternalUpdatesOnly,
    /// No network activity at all; evaluations use whatever the store holds.
    Offline,
}

/// Tunables for the analytics event pipeline.
#[derive(Clone, Debug)]
pub struct EventsConfig {
    pub capacity: usize,
    pub flush_interval: Duration,
    pub context_keys_capacity: usize,
    pub context_keys_flush_interval: Duration,
    pub all_attributes_private: bool,
    pub private_attributes: Vec<String>,
    /// Serialize the full (redacted) context into feature and custom events
    /// instead of referencing it by key.
    pub inline_users_in_events: bool,
    pub diagnostic_opt_out: bool,
    pub diagnostic_recording_interval: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            context_keys_capacity: DEFAULT_CONTEXT_KEYS_CAPACITY,
            context_keys_flush_interval: DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL,
            all_attributes_private: false,
            private_attributes: Vec::new(),
            inline_users_in_events: false,
            diagnostic_opt_out: false,
            diagnostic_recording_interval: DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL,
        }
    }
}

/// Tunables for the big-segment facade.
#[derive(Clone, Debug)]
pub struct BigSegmentsConfig {
    pub context_cache_size: usize,
    pub context_cache_ttl: Duration,
    pub status_poll_interval: Duration,
    /// How old the store's metadata timestamp may be before evaluations
    /// report `STALE`.
    pub stale_after: Duration,
}

impl Default for BigSegmentsConfig {
    fn default() -> Self {
        Self {
            context_cache_size: 1_000,
            context_cache_ttl: Duration::from_secs(5),
            status_poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(120),
        }
    }
}

/// The complete, validated SDK configuration. Build one with
/// [`ConfigBuilder`].
#[derive(Clone, Debug)]
pub struct Config {
    pub sdk_key: String,
    pub endpoints: ServiceEndpoints,
    pub mode: DataSourceMode,
    pub initial_reconnect_delay: Duration,
    pub poll_interval: Duration,
    pub events: EventsConfig,
    pub big_segments: BigSegmentsConfig,
    pub http: HttpProperties,
    /// Emit a log line for every evaluation that returns an error reason.
    pub log_evaluation_errors: bool,
    /// Include the context key in those log lines. Off by default since keys
    /// are frequently personally identifying.
    pub log_context_key_in_errors: bool,
}

impl Config {
    pub fn builder(sdk_key: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(sdk_key)
    }

    pub fn offline(&self) -> bool {
        self.mode == DataSourceMode::Offline
    }
}
