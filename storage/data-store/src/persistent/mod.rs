// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The caching wrapper that adapts a raw [`PersistentDataStore`] adapter to
//! the full [`DataStore`] interface. Caching and availability monitoring are
//! deliberately the wrapper's concern so that adapters stay dumb blob CRUD.

use beacon_infallible::Mutex;
use beacon_store_interface::{
    deserialize_item, serialize_item, DataStore, DataStoreStatus, DataStoreStatusProvider,
    PersistentDataStore, StatusBroadcaster, StatusSubscription, StoreError,
};
use beacon_types::{AllData, StoreDataKind, StoreItem};
use lru::LruCache;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{info, warn};

const ITEM_CACHE_CAPACITY: usize = 1_000;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct CachedItem {
    item: Option<Arc<StoreItem>>,
    cached_at: Instant,
}

struct Cache {
    ttl: Duration,
    items: LruCache<(StoreDataKind, String), CachedItem>,
    all: HashMap<StoreDataKind, (HashMap<String, Arc<StoreItem>>, Instant)>,
}

impl Cache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            items: LruCache::new(ITEM_CACHE_CAPACITY),
            all: HashMap::new(),
        }
    }

    fn fresh(&self, cached_at: Instant) -> bool {
        cached_at.elapsed() < self.ttl
    }

    fn put_item(&mut self, kind: StoreDataKind, key: &str, item: Option<Arc<StoreItem>>) {
        self.items.put(
            (kind, key.to_string()),
            CachedItem {
                item,
                cached_at: Instant::now(),
            },
        );
    }
}

/// Wraps a persistent adapter with serialization, an optional read-through
/// TTL cache, and backend availability monitoring.
pub struct PersistentDataStoreWrapper {
    core: Arc<dyn PersistentDataStore>,
    cache: Option<Mutex<Cache>>,
    initialized: AtomicBool,
    monitor: Arc<AvailabilityMonitor>,
}

impl PersistentDataStoreWrapper {
    /// `cache_ttl` of `None` disables caching entirely; every read goes to
    /// the adapter.
    pub fn new(core: Arc<dyn PersistentDataStore>, cache_ttl: Option<Duration>) -> Self {
        Self {
            cache: cache_ttl.map(|ttl| Mutex::new(Cache::new(ttl))),
            monitor: Arc::new(AvailabilityMonitor::new(core.clone())),
            initialized: AtomicBool::new(false),
            core,
        }
    }

    fn record<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if result.is_err() {
            self.monitor.record_failure();
        }
        result
    }

    fn read_item(
        &self,
        kind: StoreDataKind,
        key: &str,
    ) -> Result<Option<Arc<StoreItem>>, StoreError> {
        let serialized = self.record(self.core.get(kind, key))?;
        let item = match serialized {
            None => None,
            Some(serialized) => match deserialize_item(kind, &serialized)? {
                StoreItem::Tombstone(_) => None,
                live => Some(Arc::new(live)),
            },
        };
        Ok(item)
    }
}

impl DataStore for PersistentDataStoreWrapper {
    fn init(&self, all_data: AllData) -> Result<(), StoreError> {
        let mut serialized = Vec::with_capacity(all_data.len());
        let mut for_cache: Vec<(StoreDataKind, HashMap<String, Arc<StoreItem>>)> = Vec::new();
        for (kind, items) in all_data {
            let mut kind_items = Vec::with_capacity(items.len());
            let mut kind_cache = HashMap::with_capacity(items.len());
            for (key, item) in items {
                kind_items.push((key.clone(), serialize_item(&key, &item)?));
                if !item.is_deleted() {
                    kind_cache.insert(key, Arc::new(item));
                }
            }
            serialized.push((kind, kind_items));
            for_cache.push((kind, kind_cache));
        }

        self.record(self.core.init(serialized))?;
        self.initialized.store(true, Ordering::SeqCst);

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            cache.items.clear();
            let now = Instant::now();
            for (kind, items) in for_cache {
                for (key, item) in &items {
                    cache.put_item(kind, key, Some(item.clone()));
                }
                cache.all.insert(kind, (items, now));
            }
        }
        Ok(())
    }

    fn get(&self, kind: StoreDataKind, key: &str) -> Result<Option<Arc<StoreItem>>, StoreError> {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            let ttl = cache.ttl;
            if let Some(cached) = cache.items.get(&(kind, key.to_string())) {
                if cached.cached_at.elapsed() < ttl {
                    return Ok(cached.item.clone());
                }
            }
            drop(cache);
            let item = self.read_item(kind, key)?;
            self.cache
                .as_ref()
                .unwrap()
                .lock()
                .put_item(kind, key, item.clone());
            Ok(item)
        } else {
            self.read_item(kind, key)
        }
    }

    fn get_all(
        &self,
        kind: StoreDataKind,
    ) -> Result<HashMap<String, Arc<StoreItem>>, StoreError> {
        if let Some(cache) = &self.cache {
            let cache_guard = cache.lock();
            if let Some((items, cached_at)) = cache_guard.all.get(&kind) {
                if cache_guard.fresh(*cached_at) {
                    return Ok(items.clone());
                }
            }
            drop(cache_guard);
        }

        let serialized = self.record(self.core.get_all(kind))?;
        let mut items = HashMap::with_capacity(serialized.len());
        for (key, blob) in serialized {
            match deserialize_item(kind, &blob)? {
                StoreItem::Tombstone(_) => {}
                live => {
                    items.insert(key, Arc::new(live));
                }
            }
        }

        if let Some(cache) = &self.cache {
            cache
                .lock()
                .all
                .insert(kind, (items.clone(), Instant::now()));
        }
        Ok(items)
    }

    fn upsert(
        &self,
        kind: StoreDataKind,
        key: &str,
        item: StoreItem,
    ) -> Result<bool, StoreError> {
        let serialized = serialize_item(key, &item)?;
        let updated = self.record(self.core.upsert(kind, key, serialized))?;

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            if updated {
                let shared = if item.is_deleted() {
                    None
                } else {
                    Some(Arc::new(item))
                };
                cache.put_item(kind, key, shared.clone());
                if let Some((items, _)) = cache.all.get_mut(&kind) {
                    match shared {
                        Some(live) => {
                            items.insert(key.to_string(), live);
                        }
                        None => {
                            items.remove(key);
                        }
                    }
                }
            } else {
                // Another process wrote a newer version; whatever we have
                // cached for this key may now be stale.
                cache.items.pop(&(kind, key.to_string()));
                cache.all.remove(&kind);
            }
        }
        Ok(updated)
    }

    fn is_initialized(&self) -> bool {
        if self.initialized.load(Ordering::SeqCst) {
            return true;
        }
        let initialized = self.core.is_initialized();
        if initialized {
            self.initialized.store(true, Ordering::SeqCst);
        }
        initialized
    }

    fn close(&self) {
        self.monitor.quit();
    }
}

impl DataStoreStatusProvider for PersistentDataStoreWrapper {
    fn status(&self) -> DataStoreStatus {
        DataStoreStatus {
            available: self.monitor.is_available(),
            needs_refresh: false,
        }
    }

    fn subscribe(&self) -> StatusSubscription<DataStoreStatus> {
        self.monitor.broadcaster.subscribe()
    }
}

/// Watches the adapter after a failure and announces the down/up
/// transitions. One polling thread at a time; it exits as soon as the
/// backend answers again.
struct AvailabilityMonitor {
    core: Arc<dyn PersistentDataStore>,
    available: AtomicBool,
    polling: AtomicBool,
    quit_flag: AtomicBool,
    broadcaster: StatusBroadcaster<DataStoreStatus>,
}

impl AvailabilityMonitor {
    fn new(core: Arc<dyn PersistentDataStore>) -> Self {
        Self {
            core,
            available: AtomicBool::new(true),
            polling: AtomicBool::new(false),
            quit_flag: AtomicBool::new(false),
            broadcaster: StatusBroadcaster::new(),
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn quit(&self) {
        self.quit_flag.store(true, Ordering::SeqCst);
    }

    fn record_failure(self: &Arc<Self>) {
        if self.available.swap(false, Ordering::SeqCst) {
            warn!("persistent data store is unavailable; monitoring for recovery");
            self.broadcaster.broadcast(DataStoreStatus {
                available: false,
                needs_refresh: false,
            });
        }
        if !self.polling.swap(true, Ordering::SeqCst) {
            let monitor = self.clone();
            thread::spawn(move || monitor.poll_until_available());
        }
    }

    fn poll_until_available(&self) {
        while !self.quit_flag.load(Ordering::SeqCst) {
            thread::sleep(STATUS_POLL_INTERVAL);
            if self.core.is_available() {
                self.available.store(true, Ordering::SeqCst);
                self.polling.store(false, Ordering::SeqCst);
                info!("persistent data store is available again");
                // Writes may have been lost while the backend was down, so
                // ask the data source to push its current dataset again.
                self.broadcaster.broadcast(DataStoreStatus {
                    available: true,
                    needs_refresh: true,
                });
                return;
            }
        }
        self.polling.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod persistent_test;
