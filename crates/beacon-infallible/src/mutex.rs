// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

pub use std::sync::MutexGuard;

/// A simple wrapper around `std::sync::Mutex` that panics if the lock is
/// poisoned. A poisoned lock means another thread panicked while holding it,
/// at which point continuing is not meaningful for any of our use cases.
#[derive(Debug, Default)]
pub struct Mutex<T>(std::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(t: T) -> Self {
        Self(std::sync::Mutex::new(t))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0
            .lock()
            .expect("beacon-infallible: mutex is poisoned")
    }

    pub fn into_inner(self) -> T {
        self.0
            .into_inner()
            .expect("beacon-infallible: mutex is poisoned")
    }
}
