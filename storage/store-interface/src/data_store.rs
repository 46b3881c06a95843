// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{error::StoreError, status::StatusSubscription};
use beacon_types::{AllData, StoreDataKind, StoreItem};
use std::{collections::HashMap, sync::Arc};

/// A versioned key-value store holding the active flag and segment data.
///
/// Writers (the data source) and readers (the evaluator) share one instance;
/// implementations must support many concurrent readers. Items are immutable
/// once stored, so reads hand out shared pointers.
pub trait DataStore: Send + Sync {
    /// Atomically replaces the entire contents and marks the store
    /// initialized. Initialization is sticky: once set it stays set for the
    /// life of the process, even if the data is later replaced or emptied.
    fn init(&self, all_data: AllData) -> Result<(), StoreError>;

    /// Fetches one item. Tombstones read as "not found" even though they are
    /// retained internally for version ordering.
    fn get(&self, kind: StoreDataKind, key: &str) -> Result<Option<Arc<StoreItem>>, StoreError>;

    /// All live (non-deleted) items of one kind.
    fn get_all(
        &self,
        kind: StoreDataKind,
    ) -> Result<HashMap<String, Arc<StoreItem>>, StoreError>;

    /// Version compare-and-set: the item is stored only when its version is
    /// strictly greater than whatever is already there (tombstones
    /// included). Returns whether the store was updated.
    fn upsert(
        &self,
        kind: StoreDataKind,
        key: &str,
        item: StoreItem,
    ) -> Result<bool, StoreError>;

    fn is_initialized(&self) -> bool;

    /// Releases any background resources. Idempotent.
    fn close(&self) {}
}

/// Availability of a data store, as published to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataStoreStatus {
    pub available: bool,
    /// Set on an unavailable→available transition when writes may have been
    /// lost during the outage, telling the data source to re-push its last
    /// known dataset.
    pub needs_refresh: bool,
}

impl Default for DataStoreStatus {
    fn default() -> Self {
        Self {
            available: true,
            needs_refresh: false,
        }
    }
}

/// Implemented by stores whose availability can change (the persistent
/// wrapper); the in-memory store is always available and never publishes.
pub trait DataStoreStatusProvider: Send + Sync {
    fn status(&self) -> DataStoreStatus;

    /// Subscribe to future status transitions. Dropping the subscription
    /// detaches it.
    fn subscribe(&self) -> StatusSubscription<DataStoreStatus>;
}
