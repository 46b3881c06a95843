// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Gives the duration since the Unix epoch. The system clock being set before
/// 1970 is not a condition we attempt to survive.
pub fn duration_since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before the Unix epoch")
}
