// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

pub use std::sync::{RwLockReadGuard, RwLockWriteGuard};

/// A simple wrapper around `std::sync::RwLock` that panics if the lock is
/// poisoned, mirroring [`crate::Mutex`].
#[derive(Debug, Default)]
pub struct RwLock<T>(std::sync::RwLock<T>);

impl<T> RwLock<T> {
    pub fn new(t: T) -> Self {
        Self(std::sync::RwLock::new(t))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0
            .read()
            .expect("beacon-infallible: rwlock is poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0
            .write()
            .expect("beacon-infallible: rwlock is poisoned")
    }

    pub fn into_inner(self) -> T {
        self.0
            .into_inner()
            .expect("beacon-infallible: rwlock is poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rwlock_read_write() {
        let lock = RwLock::new(5);
        {
            let r1 = lock.read();
            let r2 = lock.read();
            assert_eq!(*r1, 5);
            assert_eq!(*r2, 5);
        }
        *lock.write() = 7;
        assert_eq!(*lock.read(), 7);
    }
}
