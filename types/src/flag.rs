// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{attribute_value::AttributeValue, clause::Clause};
use serde::{Deserialize, Serialize};

/// A feature flag as delivered by the data source. Flags are immutable once
/// stored; the data source replaces whole items on update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Flag {
    pub key: String,
    pub version: u64,
    pub on: bool,
    pub prerequisites: Vec<Prerequisite>,
    pub targets: Vec<Target>,
    pub rules: Vec<Rule>,
    pub fallthrough: VariationOrRollout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub off_variation: Option<usize>,
    pub variations: Vec<AttributeValue>,
    pub salt: String,
    pub track_events: bool,
    pub track_events_fallthrough: bool,
    /// Absolute epoch-millisecond cutoff for debug events, set by the
    /// dashboard's "debugging" toggle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<u64>,
    pub client_side_availability: ClientSideAvailability,
}

impl Flag {
    pub fn variation_value(&self, index: usize) -> Option<&AttributeValue> {
        self.variations.get(index)
    }
}

/// A dependency on another flag evaluating to a specific variation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub key: String,
    pub variation: usize,
}

/// Individual targeting: serve `variation` to any context whose key is in
/// `values`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: usize,
}

/// An ordered rule: all clauses must match, then the variation or rollout
/// applies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub id: String,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
    pub clauses: Vec<Clause>,
    pub track_events: bool,
}

/// Either a fixed variation index or a weighted rollout. Exactly one of the
/// two fields is populated in well-formed data; both absent is a malformed
/// flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VariationOrRollout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<Rollout>,
}

impl VariationOrRollout {
    pub fn fixed(variation: usize) -> Self {
        Self {
            variation: Some(variation),
            rollout: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Rollout {
    pub kind: RolloutKind,
    pub variations: Vec<WeightedVariation>,
    /// Attribute whose value seeds the bucketing hash; `key` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
    /// When present, hashing uses the seed instead of flag key + salt so
    /// that experiments can be re-randomized independently of the flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RolloutKind {
    Rollout,
    Experiment,
}

impl Default for RolloutKind {
    fn default() -> Self {
        RolloutKind::Rollout
    }
}

/// One entry of a rollout; weights are in parts per 100 000.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WeightedVariation {
    pub variation: usize,
    pub weight: u32,
    /// Marks the unweighted remainder of an experiment; contexts landing
    /// here are not tracked as experiment participants.
    pub untracked: bool,
}

/// Which client-side SDK families may fetch this flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSideAvailability {
    pub using_mobile_key: bool,
    pub using_environment_id: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flag_wire_round_trip() {
        let raw = serde_json::json!({
            "key": "flag-key",
            "version": 3,
            "on": true,
            "prerequisites": [{"key": "other", "variation": 1}],
            "targets": [{"values": ["u1"], "variation": 0}],
            "rules": [{
                "id": "rule-0",
                "clauses": [{"attribute": "email", "op": "endsWith",
                             "values": ["@example.com"], "negate": false}],
                "rollout": {
                    "kind": "experiment",
                    "variations": [
                        {"variation": 0, "weight": 60000, "untracked": false},
                        {"variation": 1, "weight": 40000, "untracked": true}
                    ],
                    "seed": 42
                },
                "trackEvents": true,
            }],
            "fallthrough": {"variation": 1},
            "offVariation": 0,
            "variations": ["a", "b"],
            "salt": "saltyA",
            "trackEvents": false,
            "trackEventsFallthrough": true,
            "debugEventsUntilDate": 1_500_000u64,
            "clientSideAvailability": {"usingMobileKey": false, "usingEnvironmentId": true},
        });
        let flag: Flag = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(flag.rules[0].variation_or_rollout.rollout.as_ref().unwrap().seed, Some(42));
        assert_eq!(flag.fallthrough.variation, Some(1));
        assert_eq!(flag.variation_value(1), Some(&AttributeValue::from("b")));
        let back = serde_json::to_value(&flag).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_missing_fields_default() {
        let flag: Flag = serde_json::from_value(serde_json::json!({
            "key": "minimal", "version": 1,
        }))
        .unwrap();
        assert!(!flag.on);
        assert!(flag.off_variation.is_none());
        assert!(flag.rules.is_empty());
        assert!(flag.debug_events_until_date.is_none());
    }
}
