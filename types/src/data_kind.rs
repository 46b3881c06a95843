// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{flag::Flag, segment::Segment};
use std::collections::HashMap;

/// Namespace tag for the kinds of data the stores hold. Adding a kind means
/// adding a variant here; the stores are generic over the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreDataKind {
    Flag,
    Segment,
}

impl StoreDataKind {
    pub const ALL: [StoreDataKind; 2] = [StoreDataKind::Flag, StoreDataKind::Segment];

    /// Stable name used as a key prefix / table namespace by persistent
    /// store adapters.
    pub fn namespace(&self) -> &'static str {
        match self {
            StoreDataKind::Flag => "features",
            StoreDataKind::Segment => "segments",
        }
    }
}

/// A versioned item as held by a store. Deleted items stay behind as
/// tombstones carrying the deleting version, so a patch arriving out of
/// order cannot resurrect them.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreItem {
    Flag(Flag),
    Segment(Segment),
    Tombstone(u64),
}

impl StoreItem {
    pub fn version(&self) -> u64 {
        match self {
            StoreItem::Flag(flag) => flag.version,
            StoreItem::Segment(segment) => segment.version,
            StoreItem::Tombstone(version) => *version,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, StoreItem::Tombstone(_))
    }

    pub fn as_flag(&self) -> Option<&Flag> {
        match self {
            StoreItem::Flag(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            StoreItem::Segment(segment) => Some(segment),
            _ => None,
        }
    }
}

impl From<Flag> for StoreItem {
    fn from(flag: Flag) -> Self {
        StoreItem::Flag(flag)
    }
}

impl From<Segment> for StoreItem {
    fn from(segment: Segment) -> Self {
        StoreItem::Segment(segment)
    }
}

/// A full dataset as delivered by `put` or a poll: kind → key → item.
pub type AllData = HashMap<StoreDataKind, HashMap<String, StoreItem>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions() {
        let flag = Flag {
            key: "f".to_string(),
            version: 9,
            ..Flag::default()
        };
        assert_eq!(StoreItem::from(flag).version(), 9);
        assert_eq!(StoreItem::Tombstone(4).version(), 4);
        assert!(StoreItem::Tombstone(4).is_deleted());
    }
}
