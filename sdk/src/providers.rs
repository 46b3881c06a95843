// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Thin adapters wiring the stores and diagnostics into the traits the
//! evaluator and data source consume.

use beacon_data_store::BigSegmentStoreWrapper;
use beacon_datasource::StreamInitRecorder;
use beacon_evaluation::{BigSegmentProvider, BigSegmentQuery, DataProvider};
use beacon_events::DiagnosticsAccumulator;
use beacon_store_interface::DataStore;
use beacon_types::{StoreDataKind, StoreItem};
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Evaluator read access over the shared data store. Store read failures are
/// logged and read as "not found"; the evaluation then resolves to the
/// caller's default via the normal error reasons.
pub(crate) struct StoreDataProvider {
    pub store: Arc<dyn DataStore>,
}

impl StoreDataProvider {
    fn get(&self, kind: StoreDataKind, key: &str) -> Option<Arc<StoreItem>> {
        match self.store.get(kind, key) {
            Ok(item) => item,
            Err(error) => {
                warn!("data store read for {:?} failed: {}", key, error);
                None
            }
        }
    }
}

impl DataProvider for StoreDataProvider {
    fn flag(&self, key: &str) -> Option<Arc<StoreItem>> {
        self.get(StoreDataKind::Flag, key)
    }

    fn segment(&self, key: &str) -> Option<Arc<StoreItem>> {
        self.get(StoreDataKind::Segment, key)
    }
}

pub(crate) struct BigSegmentEvalProvider {
    pub wrapper: Arc<BigSegmentStoreWrapper>,
}

impl BigSegmentProvider for BigSegmentEvalProvider {
    fn query(&self, context_key: &str) -> BigSegmentQuery {
        let (membership, status) = self.wrapper.query(context_key);
        BigSegmentQuery { membership, status }
    }
}

/// Routes the streaming source's connection records into the diagnostics
/// counters.
pub(crate) struct StreamDiagnosticsRecorder {
    pub accumulator: Arc<DiagnosticsAccumulator>,
}

impl StreamInitRecorder for StreamDiagnosticsRecorder {
    fn record_stream_init(&self, timestamp_ms: u64, duration: Duration, failed: bool) {
        self.accumulator
            .record_stream_init(timestamp_ms, duration, failed);
    }
}
