// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The contracts between the data stores, the data sources that write to
//! them, and the evaluator that reads from them. Concrete stores live in
//! `beacon-data-store`; persistent-store adapters implement
//! [`PersistentDataStore`] and nothing else.

mod big_segments;
mod data_store;
mod error;
mod persistent;
mod status;

pub use big_segments::{BigSegmentMembership, BigSegmentMetadata, BigSegmentStore};
pub use data_store::{DataStore, DataStoreStatus, DataStoreStatusProvider};
pub use error::StoreError;
pub use persistent::{deserialize_item, serialize_item, PersistentDataStore, SerializedItem};
pub use status::{StatusBroadcaster, StatusSubscription};
