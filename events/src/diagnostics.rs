// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic telemetry: an initialization payload describing the SDK and
//! its configuration, and periodic payloads with usage counters accumulated
//! since the previous one.

use beacon_config::{Config, DataSourceMode};
use beacon_infallible::{duration_since_epoch, Mutex};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use uuid::Uuid;

/// Counters shared between the event worker, the sender, and the data
/// source. Everything here is monotonic within one recording period and is
/// drained when the periodic payload is built.
#[derive(Default)]
pub struct DiagnosticsAccumulator {
    dropped_events: AtomicU64,
    deduplicated_contexts: AtomicU64,
    events_in_last_batch: AtomicU64,
    stream_inits: Mutex<Vec<Value>>,
}

impl DiagnosticsAccumulator {
    pub fn record_dropped_event(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated_context(&self) {
        self.deduplicated_contexts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_events_in_last_batch(&self, count: u64) {
        self.events_in_last_batch.store(count, Ordering::Relaxed);
    }

    pub fn record_stream_init(&self, timestamp_ms: u64, duration: Duration, failed: bool) {
        self.stream_inits.lock().push(json!({
            "timestamp": timestamp_ms,
            "durationMillis": duration.as_millis() as u64,
            "failed": failed,
        }));
    }

    fn drain(&self) -> (u64, u64, u64, Vec<Value>) {
        (
            self.dropped_events.swap(0, Ordering::Relaxed),
            self.deduplicated_contexts.swap(0, Ordering::Relaxed),
            self.events_in_last_batch.swap(0, Ordering::Relaxed),
            std::mem::take(&mut *self.stream_inits.lock()),
        )
    }
}

pub struct DiagnosticsManager {
    id: Value,
    data_since: AtomicU64,
}

impl DiagnosticsManager {
    pub fn new(sdk_key: &str) -> Self {
        let suffix_start = sdk_key.len().saturating_sub(6);
        Self {
            id: json!({
                "diagnosticId": Uuid::new_v4().to_string(),
                "sdkKeySuffix": &sdk_key[suffix_start..],
            }),
            data_since: AtomicU64::new(duration_since_epoch().as_millis() as u64),
        }
    }

    pub fn init_payload(&self, config: &Config) -> Value {
        json!({
            "kind": "diagnostic-init",
            "id": self.id,
            "creationDate": duration_since_epoch().as_millis() as u64,
            "sdk": {
                "name": "beacon-server-sdk",
                "version": env!("CARGO_PKG_VERSION"),
                "wrapperName": config.http.wrapper_name,
                "wrapperVersion": config.http.wrapper_version,
            },
            "configuration": describe_configuration(config),
            "platform": {
                "name": "rust",
                "osName": std::env::consts::OS,
                "osArch": std::env::consts::ARCH,
            },
        })
    }

    pub fn periodic_payload(&self, accumulator: &DiagnosticsAccumulator) -> Value {
        let now = duration_since_epoch().as_millis() as u64;
        let (dropped, deduplicated, last_batch, stream_inits) = accumulator.drain();
        let data_since = self.data_since.swap(now, Ordering::SeqCst);
        json!({
            "kind": "diagnostic",
            "id": self.id,
            "creationDate": now,
            "dataSinceDate": data_since,
            "droppedEvents": dropped,
            "deduplicatedUsers": deduplicated,
            "eventsInLastBatch": last_batch,
            "streamInits": stream_inits,
        })
    }
}

fn describe_configuration(config: &Config) -> Value {
    json!({
        "customStreamURI": config.endpoints.is_custom_streaming(),
        "customBaseURI": config.endpoints.is_custom_polling(),
        "customEventsURI": config.endpoints.is_custom_events(),
        "eventsCapacity": config.events.capacity,
        "connectTimeoutMillis": config.http.connect_timeout.as_millis() as u64,
        "eventsFlushIntervalMillis": config.events.flush_interval.as_millis() as u64,
        "pollingIntervalMillis": config.poll_interval.as_millis() as u64,
        "reconnectTimeMillis": config.initial_reconnect_delay.as_millis() as u64,
        "streamingDisabled": config.mode != DataSourceMode::Streaming,
        "offline": config.offline(),
        "allAttributesPrivate": config.events.all_attributes_private,
        "contextKeysCapacity": config.events.context_keys_capacity,
        "contextKeysFlushIntervalMillis":
            config.events.context_keys_flush_interval.as_millis() as u64,
        "diagnosticRecordingIntervalMillis":
            config.events.diagnostic_recording_interval.as_millis() as u64,
        "usingProxy": config.http.proxy.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_config::ConfigBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_init_payload_describes_configuration() {
        let config = ConfigBuilder::new("sdk-key-abc123")
            .events_base_uri("http://localhost:9")
            .build()
            .unwrap();
        let manager = DiagnosticsManager::new(&config.sdk_key);
        let payload = manager.init_payload(&config);
        assert_eq!(payload["kind"], "diagnostic-init");
        assert_eq!(payload["id"]["sdkKeySuffix"], "abc123");
        assert_eq!(payload["configuration"]["customEventsURI"], true);
        assert_eq!(payload["configuration"]["customStreamURI"], false);
        assert_eq!(payload["configuration"]["eventsCapacity"], 10_000);
        assert_eq!(payload["platform"]["name"], "rust");
    }

    #[test]
    fn test_periodic_payload_drains_counters() {
        let manager = DiagnosticsManager::new("k");
        let accumulator = DiagnosticsAccumulator::default();
        accumulator.record_dropped_event();
        accumulator.record_dropped_event();
        accumulator.record_deduplicated_context();
        accumulator.set_events_in_last_batch(7);
        accumulator.record_stream_init(123, Duration::from_millis(45), false);

        let payload = manager.periodic_payload(&accumulator);
        assert_eq!(payload["kind"], "diagnostic");
        assert_eq!(payload["droppedEvents"], 2);
        assert_eq!(payload["deduplicatedUsers"], 1);
        assert_eq!(payload["eventsInLastBatch"], 7);
        assert_eq!(payload["streamInits"][0]["durationMillis"], 45);

        // a second period starts from zero
        let payload = manager.periodic_payload(&accumulator);
        assert_eq!(payload["droppedEvents"], 0);
        assert_eq!(payload["streamInits"], json!([]));
    }
}
