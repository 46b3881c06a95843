// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Deterministic bucketing. A context's bucket for a given flag is a number
//! in [0, 1) derived from a SHA-1 hash, stable across processes and across
//! SDK implementations, which is what makes percentage rollouts consistent
//! fleet-wide.

use beacon_types::{Context, Rollout, RolloutKind, WeightedVariation};
use sha1::{Digest, Sha1};

const LONG_SCALE: f64 = 0xFFFF_FFFF_FFFF_FFF_u64 as f64;

/// Hashes `{seed or "flagKey.salt"}.{value}` and scales the first 60 bits
/// into [0, 1).
pub fn bucket_value(seed: Option<i64>, key: &str, salt: &str, value: &str) -> f64 {
    let input = match seed {
        Some(seed) => format!("{}.{}", seed, value),
        None => format!("{}.{}.{}", key, salt, value),
    };
    let digest = Sha1::digest(input.as_bytes());
    let hex = hex_prefix(&digest, 15);
    u64::from_str_radix(&hex, 16).unwrap_or(0) as f64 / LONG_SCALE
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

/// The outcome of resolving a rollout for a context.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RolloutResult {
    pub variation: usize,
    pub in_experiment: bool,
}

/// The string a context contributes to the bucketing hash for the given
/// attribute: the attribute's stable string form, with the `secondary` key
/// appended when one is set so that otherwise-identical keys can be split.
pub(crate) fn context_bucketable_string(context: &Context, bucket_by: &str) -> Option<String> {
    let mut value = context
        .attribute_by_kind(None, bucket_by)
        .and_then(|value| value.bucketable_string())?;
    if let Some(secondary) = context
        .attribute_by_kind(None, "secondary")
        .and_then(|s| s.as_str().map(str::to_string))
    {
        value.push('.');
        value.push_str(&secondary);
    }
    Some(value)
}

/// Picks the winning entry of a rollout. The bucket-by attribute (default
/// `key`) is read from the context; a context with no usable value buckets
/// to zero and the last entry wins.
pub(crate) fn resolve_rollout(
    rollout: &Rollout,
    context: &Context,
    flag_key: &str,
    salt: &str,
) -> Option<RolloutResult> {
    let last = rollout.variations.last()?;

    let bucket_by = rollout.bucket_by.as_deref().unwrap_or("key");
    let bucketable = context_bucketable_string(context, bucket_by);

    let is_experiment = rollout.kind == RolloutKind::Experiment;

    let winner: &WeightedVariation = match bucketable {
        None => last,
        Some(value) => {
            let bucket = bucket_value(rollout.seed, flag_key, salt, &value);
            let mut sum = 0.0;
            let mut winner = None;
            for weighted in &rollout.variations {
                sum += f64::from(weighted.weight) / 100_000.0;
                if bucket < sum {
                    winner = Some(weighted);
                    break;
                }
            }
            // Floating-point drift or weights summing below 100 000: the
            // remainder lands on the last entry.
            winner.unwrap_or(last)
        }
    };

    Some(RolloutResult {
        variation: winner.variation,
        in_experiment: is_experiment && !winner.untracked,
    })
}
