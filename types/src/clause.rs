// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::attribute_value::AttributeValue;
use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};

/// A single condition inside a flag rule or segment rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    pub attribute: String,
    pub op: Operator,
    #[serde(default)]
    pub values: Vec<AttributeValue>,
    #[serde(default)]
    pub negate: bool,
    /// Which part of a multi-kind context the attribute is read from.
    /// Absent means the `user` kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_kind: Option<String>,
}

/// The closed set of clause operators. Operators added by a newer service
/// version deserialize as `Unrecognized` and simply never match, so old SDKs
/// degrade instead of erroring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    StartsWith,
    EndsWith,
    Matches,
    Contains,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SemVerEqual,
    SemVerLessThan,
    SemVerGreaterThan,
    SegmentMatch,
    Unrecognized(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::In => "in",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::Contains => "contains",
            Operator::LessThan => "lessThan",
            Operator::LessThanOrEqual => "lessThanOrEqual",
            Operator::GreaterThan => "greaterThan",
            Operator::GreaterThanOrEqual => "greaterThanOrEqual",
            Operator::Before => "before",
            Operator::After => "after",
            Operator::SemVerEqual => "semVerEqual",
            Operator::SemVerLessThan => "semVerLessThan",
            Operator::SemVerGreaterThan => "semVerGreaterThan",
            Operator::SegmentMatch => "segmentMatch",
            Operator::Unrecognized(raw) => raw,
        }
    }
}

impl From<&str> for Operator {
    fn from(raw: &str) -> Self {
        match raw {
            "in" => Operator::In,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "matches" => Operator::Matches,
            "contains" => Operator::Contains,
            "lessThan" => Operator::LessThan,
            "lessThanOrEqual" => Operator::LessThanOrEqual,
            "greaterThan" => Operator::GreaterThan,
            "greaterThanOrEqual" => Operator::GreaterThanOrEqual,
            "before" => Operator::Before,
            "after" => Operator::After,
            "semVerEqual" => Operator::SemVerEqual,
            "semVerLessThan" => Operator::SemVerLessThan,
            "semVerGreaterThan" => Operator::SemVerGreaterThan,
            "segmentMatch" => Operator::SegmentMatch,
            other => Operator::Unrecognized(other.to_string()),
        }
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Operator::from(raw.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_round_trips_including_unknown() {
        for raw in &["in", "semVerLessThan", "someFutureOp"] {
            let op: Operator = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(serde_json::to_value(&op).unwrap(), serde_json::json!(raw));
        }
        assert_eq!(
            Operator::from("someFutureOp"),
            Operator::Unrecognized("someFutureOp".to_string())
        );
    }

    #[test]
    fn test_clause_defaults() {
        let clause: Clause = serde_json::from_value(serde_json::json!({
            "attribute": "email",
            "op": "endsWith",
        }))
        .unwrap();
        assert!(!clause.negate);
        assert!(clause.values.is_empty());
        assert!(clause.context_kind.is_none());
    }
}
