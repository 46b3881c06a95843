// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Concrete data stores: the default in-memory store, the caching wrapper
//! that puts a database adapter behind the same interface, and the
//! big-segment membership facade.

mod big_segments;
mod memory;
mod persistent;

pub use big_segments::{BigSegmentStoreStatus, BigSegmentStoreWrapper};
pub use memory::InMemoryDataStore;
pub use persistent::PersistentDataStoreWrapper;
