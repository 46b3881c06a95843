// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{
    all_flags::{AllFlagsOptions, AllFlagsState, FlagState},
    error::StartError,
    providers::{BigSegmentEvalProvider, StoreDataProvider, StreamDiagnosticsRecorder},
};
use beacon_config::{Config, DataSourceMode};
use beacon_data_store::{BigSegmentStoreWrapper, InMemoryDataStore, PersistentDataStoreWrapper};
use beacon_datasource::{DataSource, NullDataSource, PollingDataSource, StreamingDataSource};
use beacon_evaluation::{Evaluator, PrerequisiteEvaluation};
use beacon_events::{CustomRecord, EvaluationRecord, EventProcessor, IdentifyRecord};
use beacon_infallible::duration_since_epoch;
use beacon_store_interface::{
    BigSegmentStore, DataStore, DataStoreStatusProvider, PersistentDataStore,
};
use beacon_types::{
    AttributeValue, Context, ErrorKind, EvaluationDetail, Flag, StoreDataKind, StoreItem,
};
use futures::channel::oneshot;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, warn};

/// Builds the active data source, given the store it should write to. Used
/// by deployments (and tests) that bring their own source.
pub type DataSourceFactory = Box<dyn FnOnce(Arc<dyn DataStore>) -> Arc<dyn DataSource> + Send>;

/// Component selection on top of a validated [`Config`].
pub struct ClientBuilder {
    config: Config,
    persistent: Option<(Arc<dyn PersistentDataStore>, Option<Duration>)>,
    big_segments: Option<Arc<dyn BigSegmentStore>>,
    data_source_factory: Option<DataSourceFactory>,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            persistent: None,
            big_segments: None,
            data_source_factory: None,
        }
    }

    /// Mirror the dataset into (and read it from) a persistent store
    /// adapter. `cache_ttl` of `None` disables the read-through cache.
    pub fn persistent_data_store(
        mut self,
        core: Arc<dyn PersistentDataStore>,
        cache_ttl: Option<Duration>,
    ) -> Self {
        self.persistent = Some((core, cache_ttl));
        self
    }

    pub fn big_segment_store(mut self, core: Arc<dyn BigSegmentStore>) -> Self {
        self.big_segments = Some(core);
        self
    }

    pub fn data_source_factory(mut self, factory: DataSourceFactory) -> Self {
        self.data_source_factory = Some(factory);
        self
    }

    /// Wires everything together. Must be called from within a tokio
    /// runtime; background workers are spawned here.
    pub fn build(self) -> Client {
        let config = self.config;

        let (store, store_status): (
            Arc<dyn DataStore>,
            Option<Arc<dyn DataStoreStatusProvider>>,
        ) = match self.persistent {
            Some((core, cache_ttl)) => {
                let wrapper = Arc::new(PersistentDataStoreWrapper::new(core, cache_ttl));
                let status: Arc<dyn DataStoreStatusProvider> = wrapper.clone();
                (wrapper, Some(status))
            }
            None => (Arc::new(InMemoryDataStore::new()), None),
        };

        let events = Arc::new(if config.offline() {
            EventProcessor::null()
        } else {
            EventProcessor::new(&config)
        });

        let big_segments = self.big_segments.map(|core| {
            Arc::new(BigSegmentStoreWrapper::new(
                core,
                config.big_segments.context_cache_size,
                config.big_segments.context_cache_ttl,
                config.big_segments.status_poll_interval,
                config.big_segments.stale_after,
            ))
        });

        let data_source: Arc<dyn DataSource> = match self.data_source_factory {
            Some(factory) => factory(store.clone()),
            None => match config.mode {
                DataSourceMode::Streaming => {
                    let mut source = StreamingDataSource::new(&config, store.clone());
                    if let Some(provider) = &store_status {
                        source = source.with_store_status(provider.clone());
                    }
                    if !config.events.diagnostic_opt_out {
                        source = source.with_stream_init_recorder(Arc::new(
                            StreamDiagnosticsRecorder {
                                accumulator: events.accumulator(),
                            },
                        ));
                    }
                    Arc::new(source)
                }
                DataSourceMode::Polling => {
                    let mut source = PollingDataSource::new(&config, store.clone());
                    if let Some(provider) = &store_status {
                        source = source.with_store_status(provider.clone());
                    }
                    Arc::new(source)
                }
                DataSourceMode::ExternalUpdatesOnly | DataSourceMode::Offline => {
                    Arc::new(NullDataSource)
                }
            },
        };

        Client {
            config,
            store,
            store_status,
            data_source,
            events,
            big_segments,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

/// The SDK client. One instance per process is the intended shape; it is
/// safe to share across threads and cheap to call concurrently.
pub struct Client {
    config: Config,
    store: Arc<dyn DataStore>,
    store_status: Option<Arc<dyn DataStoreStatusProvider>>,
    data_source: Arc<dyn DataSource>,
    events: Arc<EventProcessor>,
    big_segments: Option<Arc<BigSegmentStoreWrapper>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl Client {
    /// A client with the default component stack.
    pub fn build(config: Config) -> Client {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Starts the data source and waits up to `wait` for initial flag data.
    /// The client is usable whatever the outcome: on [`StartError::Timeout`]
    /// the source keeps working in the background, and until data arrives
    /// evaluations return defaults.
    pub async fn start_with_timeout(&self, wait: Duration) -> Result<(), StartError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StartError::AlreadyStarted);
        }
        let (ready_tx, ready_rx) = oneshot::channel();
        self.data_source.start(ready_tx).await;
        match tokio::time::timeout(wait, ready_rx).await {
            Ok(Ok(true)) => {
                info!("client initialized");
                Ok(())
            }
            Ok(_) => Err(StartError::InitializationFailed),
            Err(_) => {
                warn!(
                    "client did not initialize within {:?}; continuing in the background",
                    wait
                );
                Err(StartError::Timeout)
            }
        }
    }

    pub fn initialized(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.data_source.is_initialized()
    }

    /// Current availability of the backing data store. `None` when the
    /// default in-memory store is in use, since it cannot become
    /// unavailable.
    pub fn data_store_status(&self) -> Option<beacon_store_interface::DataStoreStatus> {
        self.store_status.as_ref().map(|provider| provider.status())
    }

    pub fn bool_variation(&self, context: &Context, flag_key: &str, default: bool) -> bool {
        self.bool_variation_detail_internal(context, flag_key, default, false)
            .value
    }

    pub fn bool_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        default: bool,
    ) -> EvaluationDetail<bool> {
        self.bool_variation_detail_internal(context, flag_key, default, true)
    }

    pub fn int_variation(&self, context: &Context, flag_key: &str, default: i64) -> i64 {
        self.int_variation_detail_internal(context, flag_key, default, false)
            .value
    }

    pub fn int_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        default: i64,
    ) -> EvaluationDetail<i64> {
        self.int_variation_detail_internal(context, flag_key, default, true)
    }

    pub fn float_variation(&self, context: &Context, flag_key: &str, default: f64) -> f64 {
        self.float_variation_detail_internal(context, flag_key, default, false)
            .value
    }

    pub fn float_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        default: f64,
    ) -> EvaluationDetail<f64> {
        self.float_variation_detail_internal(context, flag_key, default, true)
    }

    pub fn string_variation(
        &self,
        context: &Context,
        flag_key: &str,
        default: &str,
    ) -> String {
        self.string_variation_detail_internal(context, flag_key, default, false)
            .value
    }

    pub fn string_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        default: &str,
    ) -> EvaluationDetail<String> {
        self.string_variation_detail_internal(context, flag_key, default, true)
    }

    pub fn json_variation(
        &self,
        context: &Context,
        flag_key: &str,
        default: AttributeValue,
    ) -> AttributeValue {
        self.variation_internal(context, flag_key, default, false)
            .value
    }

    pub fn json_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        default: AttributeValue,
    ) -> EvaluationDetail<AttributeValue> {
        self.variation_internal(context, flag_key, default, true)
    }

    fn bool_variation_detail_internal(
        &self,
        context: &Context,
        flag_key: &str,
        default: bool,
        include_reason: bool,
    ) -> EvaluationDetail<bool> {
        let detail =
            self.variation_internal(context, flag_key, AttributeValue::Bool(default), include_reason);
        coerce(detail, default, AttributeValue::as_bool)
    }

    fn int_variation_detail_internal(
        &self,
        context: &Context,
        flag_key: &str,
        default: i64,
        include_reason: bool,
    ) -> EvaluationDetail<i64> {
        let detail = self.variation_internal(
            context,
            flag_key,
            AttributeValue::from(default),
            include_reason,
        );
        // integer requests truncate fractional variations toward zero
        coerce(detail, default, |value| {
            value.as_f64().map(|number| number.trunc() as i64)
        })
    }

    fn float_variation_detail_internal(
        &self,
        context: &Context,
        flag_key: &str,
        default: f64,
        include_reason: bool,
    ) -> EvaluationDetail<f64> {
        let detail = self.variation_internal(
            context,
            flag_key,
            AttributeValue::from(default),
            include_reason,
        );
        coerce(detail, default, AttributeValue::as_f64)
    }

    fn string_variation_detail_internal(
        &self,
        context: &Context,
        flag_key: &str,
        default: &str,
        include_reason: bool,
    ) -> EvaluationDetail<String> {
        let detail = self.variation_internal(
            context,
            flag_key,
            AttributeValue::from(default),
            include_reason,
        );
        coerce(detail, default.to_string(), |value| {
            value.as_str().map(str::to_string)
        })
    }

    /// The shared evaluation path: store lookup, evaluator run, event
    /// recording (prerequisites before the flag itself), error logging.
    fn variation_internal(
        &self,
        context: &Context,
        flag_key: &str,
        default: AttributeValue,
        include_reason: bool,
    ) -> EvaluationDetail<AttributeValue> {
        if self.closed.load(Ordering::SeqCst) {
            return EvaluationDetail::error(default, ErrorKind::ClientNotReady);
        }

        if !self.data_source.is_initialized() && !self.store.is_initialized() {
            self.log_evaluation_error(flag_key, context, ErrorKind::ClientNotReady);
            self.record_failed_evaluation(
                context,
                flag_key,
                &default,
                ErrorKind::ClientNotReady,
                include_reason,
            );
            return EvaluationDetail::error(default, ErrorKind::ClientNotReady);
        }

        let item = match self.store.get(StoreDataKind::Flag, flag_key) {
            Ok(item) => item,
            Err(error) => {
                warn!("data store read for {:?} failed: {}", flag_key, error);
                self.record_failed_evaluation(
                    context,
                    flag_key,
                    &default,
                    ErrorKind::Exception,
                    include_reason,
                );
                return EvaluationDetail::error(default, ErrorKind::Exception);
            }
        };
        let flag = match item.as_deref().and_then(StoreItem::as_flag) {
            Some(flag) => flag,
            None => {
                self.log_evaluation_error(flag_key, context, ErrorKind::FlagNotFound);
                self.record_failed_evaluation(
                    context,
                    flag_key,
                    &default,
                    ErrorKind::FlagNotFound,
                    include_reason,
                );
                return EvaluationDetail::error(default, ErrorKind::FlagNotFound);
            }
        };

        let provider = StoreDataProvider {
            store: self.store.clone(),
        };
        let big_segment_provider;
        let mut evaluator = Evaluator::new(&provider);
        if let Some(wrapper) = &self.big_segments {
            big_segment_provider = BigSegmentEvalProvider {
                wrapper: wrapper.clone(),
            };
            evaluator = evaluator.with_big_segments(&big_segment_provider);
        }

        let result = evaluator.evaluate(flag, context);
        let mut detail = result.detail;
        if detail.variation_index.is_none() {
            // both error results and an off flag with no off-variation fall
            // back to the caller's default
            detail.value = default.clone();
        }

        // a context without a key cannot be referenced by analytics
        if context.is_key_empty() {
            if let Some(error_kind) = detail.reason.error_kind() {
                self.log_evaluation_error(flag_key, context, error_kind);
            }
            return detail;
        }

        for prerequisite in result.prerequisite_events {
            self.events
                .record_evaluation(self.prerequisite_record(context, prerequisite));
        }
        self.events.record_evaluation(EvaluationRecord {
            creation_date: now_ms(),
            context: context.clone(),
            flag_key: flag.key.clone(),
            flag_version: Some(flag.version),
            variation: detail.variation_index,
            value: detail.value.clone(),
            default,
            reason: detail.reason.clone(),
            track_events: flag.track_events,
            force_tracking: result.force_tracking,
            include_reason,
            debug_events_until_date: flag.debug_events_until_date,
            prereq_of: None,
        });

        if let Some(error_kind) = detail.reason.error_kind() {
            self.log_evaluation_error(flag_key, context, error_kind);
        }
        detail
    }

    fn prerequisite_record(
        &self,
        context: &Context,
        prerequisite: PrerequisiteEvaluation,
    ) -> EvaluationRecord {
        EvaluationRecord {
            creation_date: now_ms(),
            context: context.clone(),
            flag_key: prerequisite.flag_key,
            flag_version: Some(prerequisite.flag_version),
            variation: prerequisite.detail.variation_index,
            value: prerequisite.detail.value,
            default: AttributeValue::Null,
            reason: prerequisite.detail.reason,
            track_events: prerequisite.track_events,
            force_tracking: prerequisite.force_tracking,
            include_reason: false,
            debug_events_until_date: prerequisite.debug_events_until_date,
            prereq_of: Some(prerequisite.prerequisite_of),
        }
    }

    fn record_failed_evaluation(
        &self,
        context: &Context,
        flag_key: &str,
        default: &AttributeValue,
        error_kind: ErrorKind,
        include_reason: bool,
    ) {
        if context.is_key_empty() {
            return;
        }
        self.events.record_evaluation(EvaluationRecord {
            creation_date: now_ms(),
            context: context.clone(),
            flag_key: flag_key.to_string(),
            flag_version: None,
            variation: None,
            value: default.clone(),
            default: default.clone(),
            reason: beacon_types::Reason::error(error_kind),
            track_events: false,
            force_tracking: false,
            include_reason,
            debug_events_until_date: None,
            prereq_of: None,
        });
    }

    fn log_evaluation_error(&self, flag_key: &str, context: &Context, error_kind: ErrorKind) {
        if !self.config.log_evaluation_errors {
            return;
        }
        if self.config.log_context_key_in_errors {
            warn!(
                "evaluation of flag {:?} for context {:?} failed: {:?}",
                flag_key,
                context.canonical_key(),
                error_kind
            );
        } else {
            warn!("evaluation of flag {:?} failed: {:?}", flag_key, error_kind);
        }
    }

    /// Evaluates every flag for one context without generating analytics
    /// events; the result serializes into the client-side bootstrap format.
    pub fn all_flags_state(&self, context: &Context, options: AllFlagsOptions) -> AllFlagsState {
        if self.closed.load(Ordering::SeqCst) {
            return AllFlagsState::invalid();
        }
        if !self.data_source.is_initialized() && !self.store.is_initialized() {
            warn!("all_flags_state called before the client has data");
            return AllFlagsState::invalid();
        }
        let items = match self.store.get_all(StoreDataKind::Flag) {
            Ok(items) => items,
            Err(error) => {
                warn!("data store read for all flags failed: {}", error);
                return AllFlagsState::invalid();
            }
        };

        let provider = StoreDataProvider {
            store: self.store.clone(),
        };
        let big_segment_provider;
        let mut evaluator = Evaluator::new(&provider);
        if let Some(wrapper) = &self.big_segments {
            big_segment_provider = BigSegmentEvalProvider {
                wrapper: wrapper.clone(),
            };
            evaluator = evaluator.with_big_segments(&big_segment_provider);
        }

        let mut flags = BTreeMap::new();
        for item in items.values() {
            let flag: &Flag = match item.as_flag() {
                Some(flag) => flag,
                None => continue,
            };
            if options.client_side_only && !flag.client_side_availability.using_environment_id {
                continue;
            }
            let result = evaluator.evaluate(flag, context);
            let tracked = flag.track_events
                || flag.track_events_fallthrough
                || result.force_tracking
                || flag.debug_events_until_date.is_some();
            let omit_details = options.details_only_for_tracked_flags && !tracked;
            flags.insert(
                flag.key.clone(),
                FlagState {
                    value: result.detail.value,
                    variation: result.detail.variation_index,
                    version: if omit_details { None } else { Some(flag.version) },
                    reason: if options.with_reasons && !omit_details {
                        Some(result.detail.reason)
                    } else {
                        None
                    },
                    track_events: flag.track_events || result.force_tracking,
                    debug_events_until_date: flag.debug_events_until_date,
                },
            );
        }
        AllFlagsState { valid: true, flags }
    }

    /// Registers the context with the analytics pipeline without evaluating
    /// anything.
    pub fn identify(&self, context: &Context) {
        if self.closed.load(Ordering::SeqCst) || context.is_key_empty() {
            return;
        }
        self.events.record_identify(IdentifyRecord {
            creation_date: now_ms(),
            context: context.clone(),
        });
    }

    /// Reports an application-defined event.
    pub fn track(&self, context: &Context, event_key: &str, data: Option<AttributeValue>) {
        self.track_internal(context, event_key, data, None);
    }

    /// Reports an application-defined event with a numeric value usable in
    /// experimentation metrics.
    pub fn track_metric(
        &self,
        context: &Context,
        event_key: &str,
        metric_value: f64,
        data: Option<AttributeValue>,
    ) {
        self.track_internal(context, event_key, data, Some(metric_value));
    }

    fn track_internal(
        &self,
        context: &Context,
        event_key: &str,
        data: Option<AttributeValue>,
        metric_value: Option<f64>,
    ) {
        if self.closed.load(Ordering::SeqCst) || context.is_key_empty() {
            return;
        }
        self.events.record_custom(CustomRecord {
            creation_date: now_ms(),
            context: context.clone(),
            key: event_key.to_string(),
            data,
            metric_value,
        });
    }

    /// Hex HMAC-SHA256 of the context key under the SDK key, used by
    /// client-side SDKs in secure mode to prove the evaluating context was
    /// issued by this server.
    pub fn secure_mode_hash(&self, context: &Context) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.sdk_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(context.canonical_key().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Requests immediate delivery of buffered analytics events.
    pub fn flush(&self) {
        self.events.flush();
    }

    /// Shuts everything down in order: data source first, then a final
    /// event flush, then the stores. Idempotent; all later operations are
    /// default-returning no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.data_source.close();
        self.events.close().await;
        self.store.close();
        if let Some(big_segments) = &self.big_segments {
            big_segments.close();
        }
        info!("client closed");
    }
}

fn now_ms() -> u64 {
    duration_since_epoch().as_millis() as u64
}

fn coerce<T>(
    detail: EvaluationDetail<AttributeValue>,
    default: T,
    extract: impl Fn(&AttributeValue) -> Option<T>,
) -> EvaluationDetail<T> {
    match extract(&detail.value) {
        Some(value) => EvaluationDetail {
            value,
            variation_index: detail.variation_index,
            reason: detail.reason,
        },
        None => EvaluationDetail::error(default, ErrorKind::WrongType),
    }
}
