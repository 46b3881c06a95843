// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::streaming::StreamingDataSource;
use beacon_config::ConfigBuilder;
use beacon_data_store::InMemoryDataStore;
use beacon_store_interface::{
    DataStoreStatus, StatusBroadcaster, StatusSubscription, StoreError,
};
use beacon_types::StoreDataKind;
use httpmock::prelude::*;
use std::{collections::HashMap, sync::atomic::AtomicUsize};

fn test_config(base_url: &str) -> Config {
    test_config_with_delay(base_url, Duration::from_millis(10))
}

/// The mock server cannot hold a stream open, so tests that must observe a
/// single connection's effects push the reconnect far past their deadline.
fn test_config_with_delay(base_url: &str, reconnect_delay: Duration) -> Config {
    ConfigBuilder::new("sdk-key")
        .streaming_base_uri(base_url)
        .initial_reconnect_delay(reconnect_delay)
        .build()
        .unwrap()
}

const PUT_BODY: &str = "event: put\ndata: {\"path\": \"/\", \"data\": {\"flags\": {\"f\": \
                        {\"key\": \"f\", \"version\": 1, \"on\": true}}, \"segments\": {}}}\n\n";

async fn start_source(
    source: &StreamingDataSource,
) -> oneshot::Receiver<bool> {
    let (tx, rx) = oneshot::channel();
    source.start(tx).await;
    rx
}

#[tokio::test]
async fn test_put_initializes_store_and_signals_ready() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/all").header("authorization", "sdk-key");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(PUT_BODY);
        })
        .await;

    let store: Arc<InMemoryDataStore> = Arc::new(InMemoryDataStore::new());
    let source = StreamingDataSource::new(&test_config(&server.base_url()), store.clone());
    let ready = start_source(&source).await;

    let became_ready = tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .expect("ready channel never resolved")
        .unwrap();
    assert!(became_ready);
    assert!(source.is_initialized());
    assert!(store.get(StoreDataKind::Flag, "f").unwrap().is_some());
    assert!(mock.hits_async().await >= 1);
    source.close();
}

#[tokio::test]
async fn test_patch_and_delete_are_applied_in_order() {
    let body = format!(
        "{}event: patch\ndata: {{\"path\": \"/flags/f\", \"data\": {{\"key\": \"f\", \
         \"version\": 2, \"on\": false}}}}\n\nevent: delete\ndata: {{\"path\": \
         \"/segments/s\", \"version\": 9}}\n\n",
        PUT_BODY
    );
    let server = MockServer::start_async().await;
    server
        .mock_async(move |when, then| {
            when.method(GET).path("/all");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(&body);
        })
        .await;

    let store: Arc<InMemoryDataStore> = Arc::new(InMemoryDataStore::new());
    let source = StreamingDataSource::new(
        &test_config_with_delay(&server.base_url(), Duration::from_secs(20)),
        store.clone(),
    );
    let ready = start_source(&source).await;
    assert!(tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .unwrap()
        .unwrap());

    // wait for the patch to land
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let item = store.get(StoreDataKind::Flag, "f").unwrap();
        if let Some(item) = item {
            if item.version() == 2 {
                break;
            }
        }
        assert!(Instant::now() < deadline, "patch was never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // the deleted segment reads as absent and cannot be resurrected by an
    // older version
    assert!(store.get(StoreDataKind::Segment, "s").unwrap().is_none());
    assert!(!store
        .upsert(
            StoreDataKind::Segment,
            "s",
            StoreItem::Tombstone(8)
        )
        .unwrap());
    source.close();
}

#[tokio::test]
async fn test_unauthorized_stops_for_good() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/all");
            then.status(401);
        })
        .await;

    let store: Arc<InMemoryDataStore> = Arc::new(InMemoryDataStore::new());
    let source = StreamingDataSource::new(&test_config(&server.base_url()), store);
    let ready = start_source(&source).await;

    let became_ready = tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .expect("ready channel never resolved")
        .unwrap();
    assert!(!became_ready);
    assert!(!source.is_initialized());

    // no further connection attempts are made
    let hits = mock.hits_async().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.hits_async().await, hits);
    source.close();
}

#[tokio::test]
async fn test_recoverable_status_keeps_retrying() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/all");
            then.status(503);
        })
        .await;

    let store: Arc<InMemoryDataStore> = Arc::new(InMemoryDataStore::new());
    let source = StreamingDataSource::new(&test_config(&server.base_url()), store);
    let _ready = start_source(&source).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while mock.hits_async().await < 2 {
        assert!(Instant::now() < deadline, "no reconnect attempt was made");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!source.is_initialized());
    source.close();
}

/// A store wrapper that counts `init` calls, for observing refreshes.
struct CountingStore {
    inner: InMemoryDataStore,
    init_calls: AtomicUsize,
}

impl DataStore for CountingStore {
    fn init(&self, all_data: beacon_types::AllData) -> Result<(), StoreError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.init(all_data)
    }

    fn get(
        &self,
        kind: StoreDataKind,
        key: &str,
    ) -> Result<Option<Arc<StoreItem>>, StoreError> {
        self.inner.get(kind, key)
    }

    fn get_all(
        &self,
        kind: StoreDataKind,
    ) -> Result<HashMap<String, Arc<StoreItem>>, StoreError> {
        self.inner.get_all(kind)
    }

    fn upsert(
        &self,
        kind: StoreDataKind,
        key: &str,
        item: StoreItem,
    ) -> Result<bool, StoreError> {
        self.inner.upsert(kind, key, item)
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }
}

struct FakeStatusProvider {
    broadcaster: StatusBroadcaster<DataStoreStatus>,
}

impl DataStoreStatusProvider for FakeStatusProvider {
    fn status(&self) -> DataStoreStatus {
        DataStoreStatus::default()
    }

    fn subscribe(&self) -> StatusSubscription<DataStoreStatus> {
        self.broadcaster.subscribe()
    }
}

#[tokio::test]
async fn test_store_recovery_replays_last_put() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/all");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(PUT_BODY);
        })
        .await;

    let store = Arc::new(CountingStore {
        inner: InMemoryDataStore::new(),
        init_calls: AtomicUsize::new(0),
    });
    let provider = Arc::new(FakeStatusProvider {
        broadcaster: StatusBroadcaster::new(),
    });
    // reconnects are pushed out to 20s so any further init call within the
    // deadline below can only come from the refresh path
    let source = StreamingDataSource::new(
        &test_config_with_delay(&server.base_url(), Duration::from_secs(20)),
        store.clone(),
    )
    .with_store_status(provider.clone());
    let ready = start_source(&source).await;
    assert!(tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .unwrap()
        .unwrap());
    let baseline = store.init_calls.load(Ordering::SeqCst);
    assert_eq!(baseline, 1);

    provider.broadcaster.broadcast(DataStoreStatus {
        available: true,
        needs_refresh: true,
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.init_calls.load(Ordering::SeqCst) == baseline {
        assert!(Instant::now() < deadline, "store was never re-initialized");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(store.get(StoreDataKind::Flag, "f").unwrap().is_some());
    source.close();
}
