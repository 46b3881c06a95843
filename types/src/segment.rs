// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::clause::Clause;
use serde::{Deserialize, Serialize};

/// A reusable set of contexts, referenced from flag rules through the
/// `segmentMatch` operator. Segments marked `unbounded` keep their membership
/// in the big-segment store rather than in this structure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Segment {
    pub key: String,
    pub version: u64,
    pub salt: String,
    pub included: Vec<String>,
    pub excluded: Vec<String>,
    /// Kind-qualified inclusion lists for non-user context kinds.
    pub included_contexts: Vec<SegmentTarget>,
    pub excluded_contexts: Vec<SegmentTarget>,
    pub rules: Vec<SegmentRule>,
    pub unbounded: bool,
    /// Bumped whenever an unbounded segment's membership is rebuilt, so
    /// stale membership snapshots under the old generation are never read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl Segment {
    /// The reference under which an unbounded segment's membership is stored:
    /// the key qualified by generation.
    pub fn reference(&self) -> String {
        match self.generation {
            Some(generation) => format!("{}.g{}", self.key, generation),
            None => self.key.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentTarget {
    pub context_kind: String,
    pub values: Vec<String>,
}

/// A rule for segment membership; an absent weight means an unconditional
/// match once the clauses pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentRule {
    pub clauses: Vec<Clause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
}
