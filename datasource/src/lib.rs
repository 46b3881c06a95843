// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Data sources: the components that keep the data store in sync with the
//! flag delivery service, either over a long-lived event stream or by
//! polling. Exactly one data source is active per client.

mod backoff;
mod http;
mod polling;
mod protocol;
mod sse;
mod streaming;

pub use polling::PollingDataSource;
pub use streaming::StreamingDataSource;

use async_trait::async_trait;
use futures::channel::oneshot;
use std::time::Duration;

/// A component that populates the data store. `start` returns immediately;
/// `ready` resolves `true` once initial data has been stored, or `false`
/// when the source has failed unrecoverably and will never initialize.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn start(&self, ready: oneshot::Sender<bool>);

    fn is_initialized(&self) -> bool;

    /// Stops all connections and background tasks. Idempotent.
    fn close(&self);
}

/// Receives one record per stream connection attempt, for the periodic
/// diagnostic payload.
pub trait StreamInitRecorder: Send + Sync {
    fn record_stream_init(&self, timestamp_ms: u64, duration: Duration, failed: bool);
}

/// A data source that never connects anywhere and is immediately "ready":
/// used for offline mode and for deployments where some other process
/// populates a shared persistent store.
pub struct NullDataSource;

#[async_trait]
impl DataSource for NullDataSource {
    async fn start(&self, ready: oneshot::Sender<bool>) {
        let _ = ready.send(true);
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn close(&self) {}
}
