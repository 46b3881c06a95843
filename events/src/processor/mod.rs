// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The event processor: a bounded intake channel in front of a single worker
//! task that owns every piece of mutable pipeline state. Callers never block;
//! when the intake channel is full the event is dropped and counted.

use crate::{
    diagnostics::{DiagnosticsAccumulator, DiagnosticsManager},
    event::{CustomRecord, EvaluationRecord, IdentifyRecord, InputEvent},
    output::{custom_event, feature_event, identify_event, index_event, Redactor},
    sender::EventSender,
    summary::SummaryBuilder,
};
use beacon_config::Config;
use beacon_infallible::{duration_since_epoch, Mutex};
use beacon_types::Context;
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use lru::LruCache;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, warn};

/// Upper bound on concurrent delivery tasks; a flush while both slots are
/// busy leaves the buffers in place for the next tick.
const MAX_CONCURRENT_DELIVERIES: usize = 2;

enum WorkerMessage {
    Event(InputEvent),
    Flush,
    Close(oneshot::Sender<()>),
}

/// Handle to the analytics pipeline. Cheap to share; all methods are
/// non-blocking except [`EventProcessor::close`].
pub struct EventProcessor {
    inbox: Mutex<mpsc::Sender<WorkerMessage>>,
    accumulator: Arc<DiagnosticsAccumulator>,
    closed: AtomicBool,
    /// A null processor accepts and discards everything (offline mode).
    null: bool,
}

impl EventProcessor {
    /// Builds the processor and spawns its worker on the current tokio
    /// runtime.
    pub fn new(config: &Config) -> Self {
        let accumulator = Arc::new(DiagnosticsAccumulator::default());
        let (tx, rx) = mpsc::channel(config.events.capacity);
        let sender = Arc::new(EventSender::new(config));
        let diagnostics = if config.events.diagnostic_opt_out {
            None
        } else {
            Some(DiagnosticsManager::new(&config.sdk_key))
        };

        let worker = EventWorker {
            inbox: rx,
            summary: SummaryBuilder::new(),
            output: Vec::new(),
            capacity: config.events.capacity,
            context_keys: LruCache::new(config.events.context_keys_capacity.max(1)),
            redactor: Redactor {
                global_private: config.events.private_attributes.clone(),
                all_attributes_private: config.events.all_attributes_private,
            },
            inline_users: config.events.inline_users_in_events,
            flush_interval: config.events.flush_interval,
            keys_flush_interval: config.events.context_keys_flush_interval,
            diagnostic_interval: config.events.diagnostic_recording_interval,
            sender,
            accumulator: accumulator.clone(),
            diagnostics,
            init_payload_config: config.clone(),
            flights: Arc::new(AtomicUsize::new(0)),
        };
        tokio::spawn(worker.run());

        Self {
            inbox: Mutex::new(tx),
            accumulator,
            closed: AtomicBool::new(false),
            null: false,
        }
    }

    /// A processor that swallows everything; used in offline mode.
    pub fn null() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            inbox: Mutex::new(tx),
            accumulator: Arc::new(DiagnosticsAccumulator::default()),
            closed: AtomicBool::new(false),
            null: true,
        }
    }

    /// Shared counters, exposed so the data source can report stream
    /// connection attempts into the same diagnostics stream.
    pub fn accumulator(&self) -> Arc<DiagnosticsAccumulator> {
        self.accumulator.clone()
    }

    pub fn record_evaluation(&self, record: EvaluationRecord) {
        self.submit(InputEvent::Evaluation(record));
    }

    pub fn record_identify(&self, record: IdentifyRecord) {
        self.submit(InputEvent::Identify(record));
    }

    pub fn record_custom(&self, record: CustomRecord) {
        self.submit(InputEvent::Custom(record));
    }

    /// Asks the worker to deliver whatever it has buffered. Returns
    /// immediately.
    pub fn flush(&self) {
        if self.null || self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.inbox.lock().try_send(WorkerMessage::Flush);
    }

    /// Final flush and worker shutdown. Idempotent; later calls return
    /// immediately.
    pub async fn close(&self) {
        if self.null || self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inbox.lock().try_send(WorkerMessage::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    fn submit(&self, event: InputEvent) {
        if self.null || self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.inbox.lock().try_send(WorkerMessage::Event(event)).is_err() {
            self.accumulator.record_dropped_event();
        }
    }
}

struct EventWorker {
    inbox: mpsc::Receiver<WorkerMessage>,
    summary: SummaryBuilder,
    output: Vec<Value>,
    capacity: usize,
    context_keys: LruCache<String, ()>,
    redactor: Redactor,
    inline_users: bool,
    flush_interval: Duration,
    keys_flush_interval: Duration,
    diagnostic_interval: Duration,
    sender: Arc<EventSender>,
    accumulator: Arc<DiagnosticsAccumulator>,
    diagnostics: Option<DiagnosticsManager>,
    init_payload_config: Config,
    flights: Arc<AtomicUsize>,
}

impl EventWorker {
    async fn run(mut self) {
        if let Some(diagnostics) = &self.diagnostics {
            let payload = diagnostics.init_payload(&self.init_payload_config);
            let sender = self.sender.clone();
            tokio::spawn(async move {
                let _ = sender.send_diagnostic(&payload).await;
            });
        }

        let start = tokio::time::Instant::now();
        let mut flush_timer =
            tokio::time::interval_at(start + self.flush_interval, self.flush_interval);
        let mut keys_timer = tokio::time::interval_at(
            start + self.keys_flush_interval,
            self.keys_flush_interval,
        );
        let mut diagnostic_timer = tokio::time::interval_at(
            start + self.diagnostic_interval,
            self.diagnostic_interval,
        );

        loop {
            tokio::select! {
                message = self.inbox.next() => match message {
                    Some(WorkerMessage::Event(event)) => self.process(event),
                    Some(WorkerMessage::Flush) => self.flush(false).await,
                    Some(WorkerMessage::Close(ack)) => {
                        self.flush(true).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
                _ = flush_timer.tick() => self.flush(false).await,
                _ = keys_timer.tick() => self.context_keys.clear(),
                _ = diagnostic_timer.tick(), if self.diagnostics.is_some() => {
                    self.send_periodic_diagnostic();
                }
            }
        }
        debug!("event worker stopped");
    }

    fn process(&mut self, event: InputEvent) {
        match event {
            InputEvent::Evaluation(record) => {
                self.summary.add(&record);
                self.notice_context(record.creation_date, &record.context, true);
                let tracked = record.track_events
                    || record.force_tracking
                    || record.reason.is_in_experiment();
                if tracked {
                    let event = feature_event(&record, false, &self.redactor);
                    self.push(event);
                }
                if self.should_debug(&record) {
                    let event = feature_event(&record, true, &self.redactor);
                    self.push(event);
                }
            }
            InputEvent::Identify(record) => {
                // identify is itself the introduction, so no index event and
                // no de-duplication accounting
                self.context_keys
                    .put(record.context.canonical_key(), ());
                let event = identify_event(&record, &self.redactor);
                self.push(event);
            }
            InputEvent::Custom(record) => {
                self.notice_context(record.creation_date, &record.context, true);
                let event = custom_event(&record, self.inline_users, &self.redactor);
                self.push(event);
            }
        }
    }

    /// Emits an index event the first time a context key is seen within the
    /// current de-duplication window.
    fn notice_context(&mut self, creation_date: u64, context: &Context, count_dedup: bool) {
        let key = context.canonical_key();
        if self.context_keys.contains(&key) {
            if count_dedup {
                self.accumulator.record_deduplicated_context();
            }
            return;
        }
        self.context_keys.put(key, ());
        let event = index_event(creation_date, context, &self.redactor);
        self.push(event);
    }

    fn should_debug(&self, record: &EvaluationRecord) -> bool {
        match record.debug_events_until_date {
            None => false,
            Some(until) => {
                let local_now = duration_since_epoch().as_millis() as u64;
                let past_server_time = self
                    .sender
                    .server_time_ms()
                    .map_or(false, |server_now| until <= server_now);
                until > local_now && !past_server_time
            }
        }
    }

    fn push(&mut self, event: Value) {
        if self.output.len() >= self.capacity {
            self.accumulator.record_dropped_event();
            warn!("event buffer is full; an event was dropped");
            return;
        }
        self.output.push(event);
    }

    async fn flush(&mut self, is_final: bool) {
        if self.sender.is_disabled() {
            self.output.clear();
            if !self.summary.is_empty() {
                let _ = self.summary.build_event();
            }
            return;
        }
        if self.output.is_empty() && self.summary.is_empty() {
            return;
        }
        if !is_final && self.flights.load(Ordering::SeqCst) >= MAX_CONCURRENT_DELIVERIES {
            debug!("all delivery slots are busy; deferring flush");
            return;
        }

        let mut events = std::mem::take(&mut self.output);
        if !self.summary.is_empty() {
            events.push(self.summary.build_event());
        }
        self.accumulator.set_events_in_last_batch(events.len() as u64);
        let payload = Value::Array(events);

        if is_final {
            let _ = self.sender.send_events(&payload).await;
        } else {
            let sender = self.sender.clone();
            let flights = self.flights.clone();
            flights.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = sender.send_events(&payload).await;
                flights.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    fn send_periodic_diagnostic(&self) {
        if let Some(diagnostics) = &self.diagnostics {
            let payload = diagnostics.periodic_payload(&self.accumulator);
            let sender = self.sender.clone();
            tokio::spawn(async move {
                let _ = sender.send_diagnostic(&payload).await;
            });
        }
    }
}

#[cfg(test)]
mod processor_test;
