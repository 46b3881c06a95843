// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Facade over a big-segment store adapter: per-context membership lookups
//! behind a bounded LRU+TTL cache, plus a poller that tracks how fresh the
//! store's data is. Membership snapshots are immutable and shared; the cache
//! only ever replaces whole entries.

use beacon_infallible::{duration_since_epoch, Mutex};
use beacon_store_interface::{
    BigSegmentMembership, BigSegmentStore, StatusBroadcaster, StatusSubscription,
};
use beacon_types::BigSegmentsStatus;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::warn;

/// Health of the big-segment store as tracked by the background poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BigSegmentStoreStatus {
    pub available: bool,
    /// True when the store has not been written by the service for longer
    /// than the configured staleness threshold.
    pub stale: bool,
}

struct CachedMembership {
    membership: Arc<BigSegmentMembership>,
    cached_at: Instant,
}

/// The context-hash membership lookup used by the evaluator for unbounded
/// segments.
pub struct BigSegmentStoreWrapper {
    store: Arc<dyn BigSegmentStore>,
    cache: Mutex<LruCache<String, CachedMembership>>,
    cache_ttl: Duration,
    poller: Arc<StatusPoller>,
}

impl BigSegmentStoreWrapper {
    pub fn new(
        store: Arc<dyn BigSegmentStore>,
        cache_size: usize,
        cache_ttl: Duration,
        status_poll_interval: Duration,
        stale_after: Duration,
    ) -> Self {
        let poller = Arc::new(StatusPoller::new(
            store.clone(),
            status_poll_interval,
            stale_after,
        ));
        let worker = poller.clone();
        thread::spawn(move || worker.work());
        Self {
            store,
            cache: Mutex::new(LruCache::new(cache_size.max(1))),
            cache_ttl,
            poller,
        }
    }

    /// Membership for one context, from cache when fresh. The status half of
    /// the result is what the evaluator attaches to its reason.
    pub fn query(
        &self,
        context_key: &str,
    ) -> (Option<Arc<BigSegmentMembership>>, BigSegmentsStatus) {
        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(context_key) {
                if cached.cached_at.elapsed() < self.cache_ttl {
                    return (Some(cached.membership.clone()), self.current_status());
                }
            }
        }

        let hash = context_hash(context_key);
        match self.store.get_membership(&hash) {
            Ok(membership) => {
                let membership = Arc::new(membership);
                self.cache.lock().put(
                    context_key.to_string(),
                    CachedMembership {
                        membership: membership.clone(),
                        cached_at: Instant::now(),
                    },
                );
                (Some(membership), self.current_status())
            }
            Err(error) => {
                warn!("big segment membership query failed: {}", error);
                (None, BigSegmentsStatus::StoreError)
            }
        }
    }

    fn current_status(&self) -> BigSegmentsStatus {
        let status = self.poller.status();
        if !status.available {
            BigSegmentsStatus::StoreError
        } else if status.stale {
            BigSegmentsStatus::Stale
        } else {
            BigSegmentsStatus::Healthy
        }
    }

    pub fn status(&self) -> BigSegmentStoreStatus {
        self.poller.status()
    }

    pub fn subscribe(&self) -> StatusSubscription<BigSegmentStoreStatus> {
        self.poller.broadcaster.subscribe()
    }

    pub fn close(&self) {
        self.poller.quit();
    }
}

/// The hash under which a context's membership is stored: URL-safe-free
/// standard base-64 of SHA-256 of the context key.
pub fn context_hash(context_key: &str) -> String {
    base64::encode(Sha256::digest(context_key.as_bytes()))
}

struct StatusPoller {
    store: Arc<dyn BigSegmentStore>,
    poll_interval: Duration,
    stale_after: Duration,
    current: Mutex<BigSegmentStoreStatus>,
    broadcaster: StatusBroadcaster<BigSegmentStoreStatus>,
    quit_flag: AtomicBool,
}

impl StatusPoller {
    fn new(store: Arc<dyn BigSegmentStore>, poll_interval: Duration, stale_after: Duration) -> Self {
        Self {
            store,
            poll_interval,
            stale_after,
            current: Mutex::new(BigSegmentStoreStatus {
                available: true,
                stale: false,
            }),
            broadcaster: StatusBroadcaster::new(),
            quit_flag: AtomicBool::new(false),
        }
    }

    fn status(&self) -> BigSegmentStoreStatus {
        *self.current.lock()
    }

    fn quit(&self) {
        self.quit_flag.store(true, Ordering::SeqCst);
    }

    fn work(&self) {
        while !self.quit_flag.load(Ordering::SeqCst) {
            self.poll_once();
            thread::sleep(self.poll_interval);
        }
    }

    fn poll_once(&self) {
        let polled = match self.store.get_metadata() {
            Ok(metadata) => BigSegmentStoreStatus {
                available: true,
                stale: match metadata.last_up_to_date {
                    // A store that has never been written is as stale as it
                    // gets.
                    None => true,
                    Some(last_up_to_date) => {
                        let now_ms = duration_since_epoch().as_millis() as u64;
                        now_ms.saturating_sub(last_up_to_date)
                            > self.stale_after.as_millis() as u64
                    }
                },
            },
            Err(error) => {
                warn!("big segment store metadata poll failed: {}", error);
                BigSegmentStoreStatus {
                    available: false,
                    stale: false,
                }
            }
        };

        let mut current = self.current.lock();
        if *current != polled {
            *current = polled;
            drop(current);
            self.broadcaster.broadcast(polled);
        }
    }
}
