// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! A snapshot of every flag's value for one context, in the JSON shape a
//! client-side SDK accepts for bootstrapping.

use beacon_types::{AttributeValue, Reason};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

/// Options for [`crate::Client::all_flags_state`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AllFlagsOptions {
    /// Only include flags marked visible to environment-ID (browser)
    /// clients.
    pub client_side_only: bool,
    /// Include evaluation reasons in the metadata.
    pub with_reasons: bool,
    /// Omit versions and reasons for flags without event tracking, shrinking
    /// the payload for the common case.
    pub details_only_for_tracked_flags: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct FlagState {
    pub value: AttributeValue,
    pub variation: Option<usize>,
    pub version: Option<u64>,
    pub reason: Option<Reason>,
    pub track_events: bool,
    pub debug_events_until_date: Option<u64>,
}

/// The result of an all-flags evaluation. Serializes as the flag values at
/// the top level plus `$flagsState` metadata and a `$valid` marker.
#[derive(Clone, Debug, Default)]
pub struct AllFlagsState {
    pub(crate) valid: bool,
    pub(crate) flags: BTreeMap<String, FlagState>,
}

impl AllFlagsState {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            flags: BTreeMap::new(),
        }
    }

    /// False when the client had no usable flag data at the time of the
    /// call; the host should not bootstrap from an invalid snapshot.
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn value(&self, flag_key: &str) -> Option<&AttributeValue> {
        self.flags.get(flag_key).map(|state| &state.value)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl Serialize for AllFlagsState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Metadata<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            variation: Option<usize>,
            #[serde(skip_serializing_if = "Option::is_none")]
            version: Option<u64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<&'a Reason>,
            #[serde(skip_serializing_if = "std::ops::Not::not")]
            track_events: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            debug_events_until_date: Option<u64>,
        }

        let mut map = serializer.serialize_map(None)?;
        for (key, state) in &self.flags {
            map.serialize_entry(key, &state.value)?;
        }
        let metadata: BTreeMap<&String, Metadata<'_>> = self
            .flags
            .iter()
            .map(|(key, state)| {
                (
                    key,
                    Metadata {
                        variation: state.variation,
                        version: state.version,
                        reason: state.reason.as_ref(),
                        track_events: state.track_events,
                        debug_events_until_date: state.debug_events_until_date,
                    },
                )
            })
            .collect();
        map.serialize_entry("$flagsState", &metadata)?;
        map.serialize_entry("$valid", &self.valid)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serialized_shape() {
        let mut state = AllFlagsState {
            valid: true,
            flags: BTreeMap::new(),
        };
        state.flags.insert(
            "flag-a".to_string(),
            FlagState {
                value: AttributeValue::from("on-value"),
                variation: Some(1),
                version: Some(42),
                reason: None,
                track_events: true,
                debug_events_until_date: None,
            },
        );
        state.flags.insert(
            "flag-b".to_string(),
            FlagState {
                value: AttributeValue::Bool(false),
                variation: None,
                version: None,
                reason: None,
                track_events: false,
                debug_events_until_date: None,
            },
        );

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "flag-a": "on-value",
                "flag-b": false,
                "$flagsState": {
                    "flag-a": {"variation": 1, "version": 42, "trackEvents": true},
                    "flag-b": {},
                },
                "$valid": true,
            })
        );
    }

    #[test]
    fn test_invalid_snapshot() {
        let state = AllFlagsState::invalid();
        assert!(!state.valid());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["$valid"], false);
    }
}
