// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The streaming data source: one long-lived server-sent-event connection,
//! a reader loop applying `put`/`patch`/`delete` events to the store, and a
//! supervisor that reconnects with jittered exponential backoff.

use crate::{
    backoff::{Backoff, MAX_DELAY},
    http::{build_client, is_recoverable_status},
    protocol::{parse_patch_item, parse_path, DeleteEvent, PatchEvent, PutEvent},
    sse::{SseDecoder, SseEvent},
    DataSource, StreamInitRecorder,
};
use async_trait::async_trait;
use beacon_config::Config;
use beacon_infallible::{duration_since_epoch, Mutex};
use beacon_store_interface::{DataStore, DataStoreStatusProvider};
use beacon_types::{AllData, StoreItem};
use futures::{channel::oneshot, StreamExt};
use reqwest::header::ACCEPT;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

enum ConnectOutcome {
    Shutdown,
    Unrecoverable,
    Retry,
}

pub struct StreamingDataSource {
    client: reqwest::Client,
    stream_url: String,
    initial_reconnect_delay: Duration,
    store: Arc<dyn DataStore>,
    store_status: Option<Arc<dyn DataStoreStatusProvider>>,
    recorder: Option<Arc<dyn StreamInitRecorder>>,
    initialized: Arc<AtomicBool>,
    last_put: Arc<Mutex<Option<AllData>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StreamingDataSource {
    pub fn new(config: &Config, store: Arc<dyn DataStore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            client: build_client(&config.sdk_key, &config.http, None),
            stream_url: format!(
                "{}/all",
                config.endpoints.streaming_base().as_str().trim_end_matches('/')
            ),
            initial_reconnect_delay: config.initial_reconnect_delay,
            store,
            store_status: None,
            recorder: None,
            initialized: Arc::new(AtomicBool::new(false)),
            last_put: Arc::new(Mutex::new(None)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Attach the store's status feed; on a `needs_refresh` transition the
    /// source re-applies its cached dataset.
    pub fn with_store_status(mut self, provider: Arc<dyn DataStoreStatusProvider>) -> Self {
        self.store_status = Some(provider);
        self
    }

    pub fn with_stream_init_recorder(mut self, recorder: Arc<dyn StreamInitRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

#[async_trait]
impl DataSource for StreamingDataSource {
    async fn start(&self, ready: oneshot::Sender<bool>) {
        let worker = StreamWorker {
            client: self.client.clone(),
            url: self.stream_url.clone(),
            initial_reconnect_delay: self.initial_reconnect_delay,
            store: self.store.clone(),
            recorder: self.recorder.clone(),
            initialized: self.initialized.clone(),
            last_put: self.last_put.clone(),
            shutdown: self.shutdown_rx.clone(),
        };
        tokio::spawn(worker.run(ready));

        if let Some(provider) = &self.store_status {
            tokio::spawn(refresh_on_recovery(
                provider.subscribe().into_receiver(),
                self.store.clone(),
                self.last_put.clone(),
                self.shutdown_rx.clone(),
            ));
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct StreamWorker {
    client: reqwest::Client,
    url: String,
    initial_reconnect_delay: Duration,
    store: Arc<dyn DataStore>,
    recorder: Option<Arc<dyn StreamInitRecorder>>,
    initialized: Arc<AtomicBool>,
    last_put: Arc<Mutex<Option<AllData>>>,
    shutdown: watch::Receiver<bool>,
}

impl StreamWorker {
    async fn run(mut self, ready: oneshot::Sender<bool>) {
        let mut ready = Some(ready);
        let mut backoff = Backoff::new(self.initial_reconnect_delay, MAX_DELAY);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.connect_once(&mut ready, &mut backoff).await {
                ConnectOutcome::Shutdown => break,
                ConnectOutcome::Unrecoverable => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(false);
                    }
                    break;
                }
                ConnectOutcome::Retry => {
                    let delay = backoff.next_delay();
                    debug!("reconnecting stream in {:?}", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => break,
                    }
                }
            }
        }
        debug!("streaming data source stopped");
    }

    async fn connect_once(
        &mut self,
        ready: &mut Option<oneshot::Sender<bool>>,
        backoff: &mut Backoff,
    ) -> ConnectOutcome {
        let attempt_timestamp = duration_since_epoch().as_millis() as u64;
        let attempt_started = Instant::now();

        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::select! {
            response = request => response,
            _ = self.shutdown.changed() => return ConnectOutcome::Shutdown,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                self.record(attempt_timestamp, attempt_started, true);
                warn!("stream connection failed: {}", error);
                return ConnectOutcome::Retry;
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.record(attempt_timestamp, attempt_started, true);
            if is_recoverable_status(status) {
                warn!("stream connection returned {}; will retry", status);
                return ConnectOutcome::Retry;
            }
            error!(
                "stream connection returned {}; the SDK key is likely invalid, giving up \
                 on streaming",
                status
            );
            return ConnectOutcome::Unrecoverable;
        }

        self.record(attempt_timestamp, attempt_started, false);
        let connected_at = Instant::now();
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = self.shutdown.changed() => return ConnectOutcome::Shutdown,
            };
            match chunk {
                None => {
                    backoff.connection_ended(connected_at);
                    warn!("stream closed by the service; reconnecting");
                    return ConnectOutcome::Retry;
                }
                Some(Err(error)) => {
                    backoff.connection_ended(connected_at);
                    warn!("stream read failed: {}; reconnecting", error);
                    return ConnectOutcome::Retry;
                }
                Some(Ok(bytes)) => {
                    for event in decoder.feed(&bytes) {
                        if let Err(error) = self.apply_event(&event, ready) {
                            // A malformed event means events may have been
                            // missed; only a fresh `put` can resynchronize.
                            backoff.connection_ended(connected_at);
                            warn!(
                                "malformed {:?} event ({}); restarting stream",
                                event.name, error
                            );
                            return ConnectOutcome::Retry;
                        }
                    }
                }
            }
        }
    }

    fn apply_event(
        &self,
        event: &SseEvent,
        ready: &mut Option<oneshot::Sender<bool>>,
    ) -> Result<(), serde_json::Error> {
        match event.name.as_str() {
            "put" => {
                let put: PutEvent = serde_json::from_str(&event.data)?;
                let all: AllData = put.data.into();
                *self.last_put.lock() = Some(all.clone());
                match self.store.init(all) {
                    Ok(()) => {
                        self.initialized.store(true, Ordering::SeqCst);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(true);
                        }
                        info!("stream delivered the initial dataset");
                    }
                    Err(error) => {
                        error!("failed to write dataset to the store: {}", error)
                    }
                }
            }
            "patch" => {
                let patch: PatchEvent = serde_json::from_str(&event.data)?;
                match parse_path(&patch.path) {
                    Some((kind, key)) => {
                        let item = parse_patch_item(kind, patch.data)?;
                        if let Err(error) = self.store.upsert(kind, key, item) {
                            error!("failed to apply patch for {:?}: {}", key, error);
                        }
                    }
                    None => warn!("ignoring patch with unrecognized path {:?}", patch.path),
                }
            }
            "delete" => {
                let delete: DeleteEvent = serde_json::from_str(&event.data)?;
                match parse_path(&delete.path) {
                    Some((kind, key)) => {
                        if let Err(error) =
                            self.store
                                .upsert(kind, key, StoreItem::Tombstone(delete.version))
                        {
                            error!("failed to apply delete for {:?}: {}", key, error);
                        }
                    }
                    None => {
                        warn!("ignoring delete with unrecognized path {:?}", delete.path)
                    }
                }
            }
            other => debug!("ignoring unrecognized stream event {:?}", other),
        }
        Ok(())
    }

    fn record(&self, timestamp_ms: u64, started: Instant, failed: bool) {
        if let Some(recorder) = &self.recorder {
            recorder.record_stream_init(timestamp_ms, started.elapsed(), failed);
        }
    }
}

/// Watches the data store status; when the store comes back after an outage
/// it may have lost writes, so the last full dataset is applied again.
async fn refresh_on_recovery(
    mut status_rx: futures::channel::mpsc::UnboundedReceiver<
        beacon_store_interface::DataStoreStatus,
    >,
    store: Arc<dyn DataStore>,
    last_put: Arc<Mutex<Option<AllData>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let status = tokio::select! {
            status = status_rx.next() => status,
            _ = shutdown.changed() => return,
        };
        match status {
            Some(status) if status.needs_refresh => {
                let snapshot = last_put.lock().clone();
                if let Some(data) = snapshot {
                    info!("data store recovered; re-applying the last known dataset");
                    if let Err(error) = store.init(data) {
                        error!("failed to refresh the recovered store: {}", error);
                    }
                }
            }
            Some(_) => {}
            None => return,
        }
    }
}

#[cfg(test)]
mod streaming_test;
