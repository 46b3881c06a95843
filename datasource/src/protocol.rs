// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The wire shapes of the flag delivery protocol, shared by the stream
//! events and the polling endpoint.

use beacon_types::{AllData, Flag, Segment, StoreDataKind, StoreItem};
use serde::Deserialize;
use std::collections::HashMap;

/// The full dataset as it appears in a `put` event's `data` property and in
/// the polling response body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AllDataOnWire {
    pub flags: HashMap<String, Flag>,
    pub segments: HashMap<String, Segment>,
}

impl From<AllDataOnWire> for AllData {
    fn from(wire: AllDataOnWire) -> Self {
        let mut all = AllData::new();
        all.insert(
            StoreDataKind::Flag,
            wire.flags
                .into_iter()
                .map(|(key, flag)| (key, StoreItem::Flag(flag)))
                .collect(),
        );
        all.insert(
            StoreDataKind::Segment,
            wire.segments
                .into_iter()
                .map(|(key, segment)| (key, StoreItem::Segment(segment)))
                .collect(),
        );
        all
    }
}

#[derive(Debug, Deserialize)]
pub struct PutEvent {
    #[serde(default)]
    pub path: String,
    pub data: AllDataOnWire,
}

#[derive(Debug, Deserialize)]
pub struct PatchEvent {
    pub path: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct DeleteEvent {
    pub path: String,
    pub version: u64,
}

/// Resolves a `/flags/{key}` or `/segments/{key}` path to a kind and key.
pub fn parse_path(path: &str) -> Option<(StoreDataKind, &str)> {
    if let Some(key) = path.strip_prefix("/flags/") {
        Some((StoreDataKind::Flag, key))
    } else {
        path.strip_prefix("/segments/")
            .map(|key| (StoreDataKind::Segment, key))
    }
}

/// Parses a patched entity into the typed item for its kind.
pub fn parse_patch_item(
    kind: StoreDataKind,
    data: serde_json::Value,
) -> Result<StoreItem, serde_json::Error> {
    Ok(match kind {
        StoreDataKind::Flag => StoreItem::Flag(serde_json::from_value::<Flag>(data)?),
        StoreDataKind::Segment => {
            StoreItem::Segment(serde_json::from_value::<Segment>(data)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("/flags/f1"), Some((StoreDataKind::Flag, "f1")));
        assert_eq!(
            parse_path("/segments/s1"),
            Some((StoreDataKind::Segment, "s1"))
        );
        assert_eq!(parse_path("/other/x"), None);
        assert_eq!(parse_path("/"), None);
    }

    #[test]
    fn test_put_event_payload() {
        let raw = r#"{
            "path": "/",
            "data": {
                "flags": {"f": {"key": "f", "version": 1, "on": true}},
                "segments": {"s": {"key": "s", "version": 2}}
            }
        }"#;
        let put: PutEvent = serde_json::from_str(raw).unwrap();
        let all: AllData = put.data.into();
        assert_eq!(
            all.get(&StoreDataKind::Flag).unwrap().get("f").unwrap().version(),
            1
        );
        assert_eq!(
            all.get(&StoreDataKind::Segment)
                .unwrap()
                .get("s")
                .unwrap()
                .version(),
            2
        );
    }

    #[test]
    fn test_patch_item_parses_by_kind() {
        let item = parse_patch_item(
            StoreDataKind::Flag,
            serde_json::json!({"key": "f", "version": 3}),
        )
        .unwrap();
        assert_eq!(item.version(), 3);
        assert!(item.as_flag().is_some());
    }
}
