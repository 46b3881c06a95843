// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use beacon_infallible::RwLock;
use beacon_store_interface::{DataStore, StoreError};
use beacon_types::{AllData, StoreDataKind, StoreItem};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// The default data store: per-kind maps behind one reader-writer lock.
/// Writes are item replacements and therefore brief, so evaluations (reads)
/// are effectively never blocked.
#[derive(Default)]
pub struct InMemoryDataStore {
    data: RwLock<HashMap<StoreDataKind, HashMap<String, Arc<StoreItem>>>>,
    initialized: AtomicBool,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for InMemoryDataStore {
    fn init(&self, all_data: AllData) -> Result<(), StoreError> {
        let mut replacement: HashMap<StoreDataKind, HashMap<String, Arc<StoreItem>>> =
            HashMap::new();
        for (kind, items) in all_data {
            replacement.insert(
                kind,
                items
                    .into_iter()
                    .map(|(key, item)| (key, Arc::new(item)))
                    .collect(),
            );
        }
        // Swap under the write lock so a concurrent reader sees either the
        // old dataset or the new one, never a mix.
        *self.data.write() = replacement;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, kind: StoreDataKind, key: &str) -> Result<Option<Arc<StoreItem>>, StoreError> {
        let data = self.data.read();
        let item = data.get(&kind).and_then(|items| items.get(key));
        Ok(item.filter(|item| !item.is_deleted()).cloned())
    }

    fn get_all(
        &self,
        kind: StoreDataKind,
    ) -> Result<HashMap<String, Arc<StoreItem>>, StoreError> {
        let data = self.data.read();
        Ok(data
            .get(&kind)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, item)| !item.is_deleted())
                    .map(|(key, item)| (key.clone(), item.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert(
        &self,
        kind: StoreDataKind,
        key: &str,
        item: StoreItem,
    ) -> Result<bool, StoreError> {
        let mut data = self.data.write();
        let items = data.entry(kind).or_default();
        match items.get(key) {
            Some(existing) if existing.version() >= item.version() => Ok(false),
            _ => {
                items.insert(key.to_string(), Arc::new(item));
                Ok(true)
            }
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}
