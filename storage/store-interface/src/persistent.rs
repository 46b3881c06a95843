// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::error::StoreError;
use beacon_types::{Flag, Segment, StoreDataKind, StoreItem};
use serde_json::json;

/// An item as a persistent adapter stores it: an opaque JSON blob plus the
/// version and deleted flag hoisted out so the adapter can apply its own
/// compare-and-set without parsing the blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedItem {
    pub version: u64,
    pub deleted: bool,
    pub serialized: String,
}

/// The raw CRUD+status contract a database adapter implements. Caching,
/// serialization, and status monitoring are the wrapper's business, never the
/// adapter's; an adapter only moves blobs.
pub trait PersistentDataStore: Send + Sync {
    /// Atomically replaces everything. The nested `Vec`s (rather than maps)
    /// let adapters preserve insertion order where their backend cares.
    fn init(
        &self,
        all_data: Vec<(StoreDataKind, Vec<(String, SerializedItem)>)>,
    ) -> Result<(), StoreError>;

    fn get(&self, kind: StoreDataKind, key: &str) -> Result<Option<SerializedItem>, StoreError>;

    fn get_all(&self, kind: StoreDataKind)
        -> Result<Vec<(String, SerializedItem)>, StoreError>;

    /// Version compare-and-set at the storage layer. Returns whether the
    /// item was written.
    fn upsert(
        &self,
        kind: StoreDataKind,
        key: &str,
        item: SerializedItem,
    ) -> Result<bool, StoreError>;

    fn is_initialized(&self) -> bool;

    /// Cheap health probe used by the availability monitor.
    fn is_available(&self) -> bool;
}

/// Serializes a store item to the blob form. Tombstones become a minimal
/// `deleted` document that survives restarts.
pub fn serialize_item(key: &str, item: &StoreItem) -> Result<SerializedItem, StoreError> {
    let serialized = match item {
        StoreItem::Flag(flag) => serde_json::to_string(flag)?,
        StoreItem::Segment(segment) => serde_json::to_string(segment)?,
        StoreItem::Tombstone(version) => {
            serde_json::to_string(&json!({"key": key, "version": version, "deleted": true}))?
        }
    };
    Ok(SerializedItem {
        version: item.version(),
        deleted: item.is_deleted(),
        serialized,
    })
}

/// Parses a blob back into a store item. A blob whose body carries
/// `"deleted": true` is honored as a tombstone even if the adapter lost the
/// out-of-band flag.
pub fn deserialize_item(
    kind: StoreDataKind,
    item: &SerializedItem,
) -> Result<StoreItem, StoreError> {
    #[derive(serde::Deserialize)]
    struct DeletedProbe {
        #[serde(default)]
        version: u64,
        #[serde(default)]
        deleted: bool,
    }

    let probe: DeletedProbe = serde_json::from_str(&item.serialized)?;
    if item.deleted || probe.deleted {
        return Ok(StoreItem::Tombstone(if item.deleted {
            item.version
        } else {
            probe.version
        }));
    }
    Ok(match kind {
        StoreDataKind::Flag => StoreItem::Flag(serde_json::from_str::<Flag>(&item.serialized)?),
        StoreDataKind::Segment => {
            StoreItem::Segment(serde_json::from_str::<Segment>(&item.serialized)?)
        }
    })
}
