// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Lock wrappers that treat poisoning as a fatal bug rather than a
//! recoverable error, so call sites are not littered with `.unwrap()`.

mod mutex;
mod rwlock;
mod time;

pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use time::duration_since_epoch;
