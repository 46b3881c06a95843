// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The polling data source: a periodic full-dataset fetch for environments
//! where a streaming connection is not possible. The configured interval is
//! clamped to the service minimum at configuration time.

use crate::{
    http::{build_client, is_recoverable_status},
    protocol::AllDataOnWire,
    DataSource,
};
use async_trait::async_trait;
use beacon_config::Config;
use beacon_store_interface::{DataStore, DataStoreStatusProvider};
use beacon_types::AllData;
use futures::{channel::oneshot, StreamExt};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PollingDataSource {
    client: reqwest::Client,
    poll_url: String,
    interval: Duration,
    store: Arc<dyn DataStore>,
    store_status: Option<Arc<dyn DataStoreStatusProvider>>,
    initialized: Arc<AtomicBool>,
    poll_now: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PollingDataSource {
    pub fn new(config: &Config, store: Arc<dyn DataStore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            client: build_client(&config.sdk_key, &config.http, Some(REQUEST_TIMEOUT)),
            poll_url: format!(
                "{}/sdk/latest-all",
                config.endpoints.polling_base().as_str().trim_end_matches('/')
            ),
            interval: config.poll_interval,
            store,
            store_status: None,
            initialized: Arc::new(AtomicBool::new(false)),
            poll_now: Arc::new(Notify::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Attach the store's status feed; `needs_refresh` triggers an
    /// immediate out-of-schedule fetch.
    pub fn with_store_status(mut self, provider: Arc<dyn DataStoreStatusProvider>) -> Self {
        self.store_status = Some(provider);
        self
    }
}

#[async_trait]
impl DataSource for PollingDataSource {
    async fn start(&self, ready: oneshot::Sender<bool>) {
        let worker = PollWorker {
            client: self.client.clone(),
            url: self.poll_url.clone(),
            interval: self.interval,
            store: self.store.clone(),
            initialized: self.initialized.clone(),
            poll_now: self.poll_now.clone(),
            shutdown: self.shutdown_rx.clone(),
        };
        tokio::spawn(worker.run(ready));

        if let Some(provider) = &self.store_status {
            let mut status_rx = provider.subscribe().into_receiver();
            let poll_now = self.poll_now.clone();
            let mut shutdown = self.shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    let status = tokio::select! {
                        status = status_rx.next() => status,
                        _ = shutdown.changed() => return,
                    };
                    match status {
                        Some(status) if status.needs_refresh => {
                            info!("data store recovered; fetching a fresh dataset");
                            poll_now.notify_one();
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            });
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct PollWorker {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    store: Arc<dyn DataStore>,
    initialized: Arc<AtomicBool>,
    poll_now: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl PollWorker {
    async fn run(mut self, ready: oneshot::Sender<bool>) {
        let mut ready = Some(ready);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            if !self.poll_once(&mut ready).await {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(false);
                }
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.poll_now.notified() => debug!("polling ahead of schedule"),
                _ = self.shutdown.changed() => break,
            }
        }
        debug!("polling data source stopped");
    }

    /// One fetch-and-store cycle. Returns false only on an unrecoverable
    /// response; transient failures leave the schedule running.
    async fn poll_once(&mut self, ready: &mut Option<oneshot::Sender<bool>>) -> bool {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!("poll request failed: {}", error);
                return true;
            }
        };

        let status = response.status();
        if !status.is_success() {
            if is_recoverable_status(status) {
                warn!("poll request returned {}; will retry", status);
                return true;
            }
            error!(
                "poll request returned {}; the SDK key is likely invalid, giving up on polling",
                status
            );
            return false;
        }

        let wire: AllDataOnWire = match response.json().await {
            Ok(wire) => wire,
            Err(error) => {
                warn!("poll response was not a valid dataset: {}", error);
                return true;
            }
        };

        let all: AllData = wire.into();
        match self.store.init(all) {
            Ok(()) => {
                if !self.initialized.swap(true, Ordering::SeqCst) {
                    info!("polling delivered the initial dataset");
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(true);
                }
            }
            Err(error) => error!("failed to write dataset to the store: {}", error),
        }
        true
    }
}
