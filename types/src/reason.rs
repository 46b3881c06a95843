// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Machine-readable explanations of evaluation results. The wire mapping
//! emits only the fields belonging to the populated discriminant, so the
//! serializer is written by hand rather than derived.

use serde::{
    de::{self, Deserializer},
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};

/// Why an evaluation failed to produce a real variation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ClientNotReady,
    FlagNotFound,
    MalformedFlag,
    UserNotSpecified,
    WrongType,
    Exception,
}

/// Health of the big-segment store as observed by an evaluation that
/// consulted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    Healthy,
    Stale,
    StoreError,
    NotConfigured,
}

#[derive(Clone, Debug, PartialEq)]
enum Kind {
    Off,
    Fallthrough {
        in_experiment: bool,
    },
    TargetMatch,
    RuleMatch {
        rule_index: usize,
        rule_id: String,
        in_experiment: bool,
    },
    PrerequisiteFailed {
        prerequisite_key: String,
    },
    Error {
        error_kind: ErrorKind,
    },
}

/// The reason component of an evaluation result.
#[derive(Clone, Debug, PartialEq)]
pub struct Reason {
    kind: Kind,
    big_segments_status: Option<BigSegmentsStatus>,
}

impl Reason {
    pub fn off() -> Self {
        Kind::Off.into()
    }

    pub fn fallthrough(in_experiment: bool) -> Self {
        Kind::Fallthrough { in_experiment }.into()
    }

    pub fn target_match() -> Self {
        Kind::TargetMatch.into()
    }

    pub fn rule_match(rule_index: usize, rule_id: impl Into<String>, in_experiment: bool) -> Self {
        Kind::RuleMatch {
            rule_index,
            rule_id: rule_id.into(),
            in_experiment,
        }
        .into()
    }

    pub fn prerequisite_failed(prerequisite_key: impl Into<String>) -> Self {
        Kind::PrerequisiteFailed {
            prerequisite_key: prerequisite_key.into(),
        }
        .into()
    }

    pub fn error(error_kind: ErrorKind) -> Self {
        Kind::Error { error_kind }.into()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, Kind::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.kind {
            Kind::Error { error_kind } => Some(error_kind),
            _ => None,
        }
    }

    /// True when the result came out of an experiment rollout; the event
    /// pipeline treats this as forced tracking.
    pub fn is_in_experiment(&self) -> bool {
        matches!(
            self.kind,
            Kind::Fallthrough {
                in_experiment: true
            } | Kind::RuleMatch {
                in_experiment: true,
                ..
            }
        )
    }

    pub fn big_segments_status(&self) -> Option<BigSegmentsStatus> {
        self.big_segments_status
    }

    pub fn with_big_segments_status(mut self, status: BigSegmentsStatus) -> Self {
        self.big_segments_status = Some(status);
        self
    }
}

impl From<Kind> for Reason {
    fn from(kind: Kind) -> Self {
        Reason {
            kind,
            big_segments_status: None,
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.kind {
            Kind::Off => map.serialize_entry("kind", "OFF")?,
            Kind::Fallthrough { in_experiment } => {
                map.serialize_entry("kind", "FALLTHROUGH")?;
                if *in_experiment {
                    map.serialize_entry("inExperiment", in_experiment)?;
                }
            }
            Kind::TargetMatch => map.serialize_entry("kind", "TARGET_MATCH")?,
            Kind::RuleMatch {
                rule_index,
                rule_id,
                in_experiment,
            } => {
                map.serialize_entry("kind", "RULE_MATCH")?;
                map.serialize_entry("ruleIndex", rule_index)?;
                if !rule_id.is_empty() {
                    map.serialize_entry("ruleId", rule_id)?;
                }
                if *in_experiment {
                    map.serialize_entry("inExperiment", in_experiment)?;
                }
            }
            Kind::PrerequisiteFailed { prerequisite_key } => {
                map.serialize_entry("kind", "PREREQUISITE_FAILED")?;
                map.serialize_entry("prerequisiteKey", prerequisite_key)?;
            }
            Kind::Error { error_kind } => {
                map.serialize_entry("kind", "ERROR")?;
                map.serialize_entry("errorKind", error_kind)?;
            }
        }
        if let Some(status) = &self.big_segments_status {
            map.serialize_entry("bigSegmentsStatus", status)?;
        }
        map.end()
    }
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ReasonOnWire {
    kind: String,
    rule_index: Option<usize>,
    rule_id: Option<String>,
    prerequisite_key: Option<String>,
    error_kind: Option<ErrorKind>,
    in_experiment: Option<bool>,
    big_segments_status: Option<BigSegmentsStatus>,
}

impl<'de> Deserialize<'de> for Reason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = ReasonOnWire::deserialize(deserializer)?;
        let in_experiment = wire.in_experiment.unwrap_or(false);
        let kind = match wire.kind.as_str() {
            "OFF" => Kind::Off,
            "FALLTHROUGH" => Kind::Fallthrough { in_experiment },
            "TARGET_MATCH" => Kind::TargetMatch,
            "RULE_MATCH" => Kind::RuleMatch {
                rule_index: wire
                    .rule_index
                    .ok_or_else(|| de::Error::missing_field("ruleIndex"))?,
                rule_id: wire.rule_id.unwrap_or_default(),
                in_experiment,
            },
            "PREREQUISITE_FAILED" => Kind::PrerequisiteFailed {
                prerequisite_key: wire
                    .prerequisite_key
                    .ok_or_else(|| de::Error::missing_field("prerequisiteKey"))?,
            },
            "ERROR" => Kind::Error {
                error_kind: wire
                    .error_kind
                    .ok_or_else(|| de::Error::missing_field("errorKind"))?,
            },
            other => return Err(de::Error::custom(format!("unknown reason kind {}", other))),
        };
        Ok(Reason {
            kind,
            big_segments_status: wire.big_segments_status,
        })
    }
}

/// An evaluation result with the variation index and reason attached.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_index: Option<usize>,
    pub reason: Reason,
}

impl<T> EvaluationDetail<T> {
    pub fn new(value: T, variation_index: Option<usize>, reason: Reason) -> Self {
        Self {
            value,
            variation_index,
            reason,
        }
    }

    pub fn error(value: T, error_kind: ErrorKind) -> Self {
        Self {
            value,
            variation_index: None,
            reason: Reason::error(error_kind),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EvaluationDetail<U> {
        EvaluationDetail {
            value: f(self.value),
            variation_index: self.variation_index,
            reason: self.reason,
        }
    }
}
