// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use rand::Rng;
use std::time::{Duration, Instant};

/// How long a connection must stay up before the backoff resets to its
/// initial delay.
pub const RESET_AFTER: Duration = Duration::from_secs(60);

pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Jittered exponential backoff for stream reconnects: the base doubles on
/// every failure up to a ceiling, and each delay is cut by a random amount
/// of up to half so that a fleet of SDKs does not reconnect in lockstep.
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        jitter(base)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Resets only when the previous connection lived long enough to count
    /// as healthy.
    pub fn connection_ended(&mut self, connected_at: Instant) {
        if connected_at.elapsed() >= RESET_AFTER {
            self.reset();
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return delay;
    }
    let cut = rand::thread_rng().gen_range(0, millis / 2 + 1);
    Duration::from_millis(millis - cut)
}
