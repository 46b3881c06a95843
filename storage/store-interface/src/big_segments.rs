// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::error::StoreError;
use std::collections::HashSet;

/// Store-reported freshness marker: when the membership data was last known
/// to be in sync with the service, in epoch milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BigSegmentMetadata {
    pub last_up_to_date: Option<u64>,
}

/// The raw membership record for one context hash: sets of generation
/// qualified segment references. Inclusion wins when a reference appears in
/// both sets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BigSegmentMembership {
    pub included: HashSet<String>,
    pub excluded: HashSet<String>,
}

/// The contract a big-segment store adapter implements. Context hashes are
/// base-64 SHA-256 of the context key; the facade computes them.
pub trait BigSegmentStore: Send + Sync {
    fn get_metadata(&self) -> Result<BigSegmentMetadata, StoreError>;

    fn get_membership(&self, context_hash: &str) -> Result<BigSegmentMembership, StoreError>;
}
