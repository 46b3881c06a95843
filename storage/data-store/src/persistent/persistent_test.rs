// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use super::*;
use beacon_store_interface::SerializedItem;
use beacon_types::Flag;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicUsize;

/// In-memory stand-in for a database adapter, with fault injection.
#[derive(Default)]
struct MockCore {
    data: Mutex<HashMap<(StoreDataKind, String), SerializedItem>>,
    initialized: AtomicBool,
    failing: AtomicBool,
    get_calls: AtomicUsize,
}

impl MockCore {
    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::backend(anyhow::anyhow!("injected failure")))
        } else {
            Ok(())
        }
    }
}

impl PersistentDataStore for MockCore {
    fn init(
        &self,
        all_data: Vec<(StoreDataKind, Vec<(String, SerializedItem)>)>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        data.clear();
        for (kind, items) in all_data {
            for (key, item) in items {
                data.insert((kind, key), item);
            }
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, kind: StoreDataKind, key: &str) -> Result<Option<SerializedItem>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.data.lock().get(&(kind, key.to_string())).cloned())
    }

    fn get_all(
        &self,
        kind: StoreDataKind,
    ) -> Result<Vec<(String, SerializedItem)>, StoreError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, key), item)| (key.clone(), item.clone()))
            .collect())
    }

    fn upsert(
        &self,
        kind: StoreDataKind,
        key: &str,
        item: SerializedItem,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        let slot = (kind, key.to_string());
        match data.get(&slot) {
            Some(existing) if existing.version >= item.version => Ok(false),
            _ => {
                data.insert(slot, item);
                Ok(true)
            }
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

fn flag_item(key: &str, version: u64) -> StoreItem {
    StoreItem::Flag(Flag {
        key: key.to_string(),
        version,
        ..Flag::default()
    })
}

fn dataset(flags: Vec<StoreItem>) -> AllData {
    let mut all = AllData::new();
    all.insert(
        StoreDataKind::Flag,
        flags
            .into_iter()
            .map(|item| (item.as_flag().unwrap().key.clone(), item))
            .collect(),
    );
    all
}

#[test]
fn test_round_trip_through_adapter() {
    let core = Arc::new(MockCore::default());
    let wrapper = PersistentDataStoreWrapper::new(core, None);
    wrapper.init(dataset(vec![flag_item("f", 1)])).unwrap();
    assert!(wrapper.is_initialized());

    let item = wrapper.get(StoreDataKind::Flag, "f").unwrap().unwrap();
    assert_eq!(item.as_flag().unwrap().key, "f");
    assert!(wrapper.get(StoreDataKind::Flag, "missing").unwrap().is_none());
}

#[test]
fn test_upsert_version_gate_applies_at_adapter() {
    let core = Arc::new(MockCore::default());
    let wrapper = PersistentDataStoreWrapper::new(core, None);
    wrapper.init(dataset(vec![flag_item("f", 5)])).unwrap();
    assert!(!wrapper
        .upsert(StoreDataKind::Flag, "f", flag_item("f", 4))
        .unwrap());
    assert!(wrapper
        .upsert(StoreDataKind::Flag, "f", flag_item("f", 6))
        .unwrap());
}

#[test]
fn test_tombstones_survive_the_blob_layer() {
    let core = Arc::new(MockCore::default());
    let wrapper = PersistentDataStoreWrapper::new(core.clone(), None);
    wrapper.init(dataset(vec![flag_item("f", 1)])).unwrap();
    assert!(wrapper
        .upsert(StoreDataKind::Flag, "f", StoreItem::Tombstone(3))
        .unwrap());
    assert!(wrapper.get(StoreDataKind::Flag, "f").unwrap().is_none());
    assert!(wrapper.get_all(StoreDataKind::Flag).unwrap().is_empty());
    // the tombstone version still gates upserts at the adapter
    assert!(!wrapper
        .upsert(StoreDataKind::Flag, "f", flag_item("f", 2))
        .unwrap());
}

#[test]
fn test_cache_absorbs_repeated_reads() {
    let core = Arc::new(MockCore::default());
    let wrapper =
        PersistentDataStoreWrapper::new(core.clone(), Some(Duration::from_secs(60)));
    wrapper.init(dataset(vec![flag_item("f", 1)])).unwrap();

    let before = core.get_calls.load(Ordering::SeqCst);
    for _ in 0..5 {
        assert!(wrapper.get(StoreDataKind::Flag, "f").unwrap().is_some());
    }
    assert_eq!(core.get_calls.load(Ordering::SeqCst), before);
}

#[test]
fn test_cache_expires_after_ttl() {
    let core = Arc::new(MockCore::default());
    let wrapper =
        PersistentDataStoreWrapper::new(core.clone(), Some(Duration::from_millis(20)));
    wrapper.init(dataset(vec![flag_item("f", 1)])).unwrap();

    let before = core.get_calls.load(Ordering::SeqCst);
    assert!(wrapper.get(StoreDataKind::Flag, "f").unwrap().is_some());
    assert_eq!(core.get_calls.load(Ordering::SeqCst), before);

    thread::sleep(Duration::from_millis(40));
    assert!(wrapper.get(StoreDataKind::Flag, "f").unwrap().is_some());
    assert_eq!(core.get_calls.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_negative_results_are_cached() {
    let core = Arc::new(MockCore::default());
    let wrapper =
        PersistentDataStoreWrapper::new(core.clone(), Some(Duration::from_secs(60)));
    wrapper.init(AllData::new()).unwrap();

    assert!(wrapper.get(StoreDataKind::Flag, "nope").unwrap().is_none());
    let after_first = core.get_calls.load(Ordering::SeqCst);
    assert!(wrapper.get(StoreDataKind::Flag, "nope").unwrap().is_none());
    assert_eq!(core.get_calls.load(Ordering::SeqCst), after_first);
}

#[test]
fn test_read_errors_surface_and_mark_unavailable() {
    let core = Arc::new(MockCore::default());
    let wrapper = PersistentDataStoreWrapper::new(core.clone(), None);
    wrapper.init(dataset(vec![flag_item("f", 1)])).unwrap();

    core.fail(true);
    assert!(wrapper.get(StoreDataKind::Flag, "f").is_err());
    assert!(!wrapper.status().available);
    wrapper.close();
}

#[tokio::test]
async fn test_recovery_publishes_needs_refresh() {
    let core = Arc::new(MockCore::default());
    let wrapper = PersistentDataStoreWrapper::new(core.clone(), None);
    wrapper.init(dataset(vec![flag_item("f", 1)])).unwrap();

    let mut subscription = wrapper.subscribe();

    core.fail(true);
    assert!(wrapper.get(StoreDataKind::Flag, "f").is_err());
    let down = subscription.receiver().next().await.unwrap();
    assert_eq!(
        down,
        DataStoreStatus {
            available: false,
            needs_refresh: false
        }
    );

    core.fail(false);
    let up = tokio::time::timeout(Duration::from_secs(3), subscription.receiver().next())
        .await
        .expect("no recovery status within the poll window")
        .unwrap();
    assert_eq!(
        up,
        DataStoreStatus {
            available: true,
            needs_refresh: true
        }
    );
    assert!(wrapper.status().available);
    wrapper.close();
}
