// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Clause operators. Every operator is total: type mismatches and parse
//! failures are non-matches, never errors, so bad targeting data cannot take
//! an evaluation down.

use beacon_types::{AttributeValue, Operator};
use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;

/// Applies one operator to a single context value and a single clause value.
/// `segmentMatch` is resolved by the evaluator before it gets here and
/// always reports no-match if asked.
pub fn apply(op: &Operator, context_value: &AttributeValue, clause_value: &AttributeValue) -> bool {
    match op {
        Operator::In => values_equal(context_value, clause_value),
        Operator::StartsWith => {
            string_op(context_value, clause_value, |a, b| a.starts_with(b))
        }
        Operator::EndsWith => string_op(context_value, clause_value, |a, b| a.ends_with(b)),
        Operator::Contains => string_op(context_value, clause_value, |a, b| a.contains(b)),
        Operator::Matches => string_op(context_value, clause_value, |a, pattern| {
            Regex::new(pattern).map(|re| re.is_match(a)).unwrap_or(false)
        }),
        Operator::LessThan => numeric_op(context_value, clause_value, |a, b| a < b),
        Operator::LessThanOrEqual => numeric_op(context_value, clause_value, |a, b| a <= b),
        Operator::GreaterThan => numeric_op(context_value, clause_value, |a, b| a > b),
        Operator::GreaterThanOrEqual => numeric_op(context_value, clause_value, |a, b| a >= b),
        Operator::Before => date_op(context_value, clause_value, |a, b| a < b),
        Operator::After => date_op(context_value, clause_value, |a, b| a > b),
        Operator::SemVerEqual => semver_op(context_value, clause_value, |a, b| a == b),
        Operator::SemVerLessThan => semver_op(context_value, clause_value, |a, b| a < b),
        Operator::SemVerGreaterThan => semver_op(context_value, clause_value, |a, b| a > b),
        Operator::SegmentMatch | Operator::Unrecognized(_) => false,
    }
}

fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    a == b
}

fn string_op(
    context_value: &AttributeValue,
    clause_value: &AttributeValue,
    f: impl Fn(&str, &str) -> bool,
) -> bool {
    match (context_value.as_str(), clause_value.as_str()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

fn numeric_op(
    context_value: &AttributeValue,
    clause_value: &AttributeValue,
    f: impl Fn(f64, f64) -> bool,
) -> bool {
    match (context_value.as_f64(), clause_value.as_f64()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// Dates are accepted as epoch milliseconds (possibly fractional) or
/// RFC 3339 strings; both normalize to fractional epoch milliseconds.
fn parse_date(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Number(millis) => Some(*millis),
        AttributeValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        _ => None,
    }
}

fn date_op(
    context_value: &AttributeValue,
    clause_value: &AttributeValue,
    f: impl Fn(f64, f64) -> bool,
) -> bool {
    match (parse_date(context_value), parse_date(clause_value)) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

static SEMVER_PAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(\.\d+)?(\.\d+)?(.*)$").unwrap());

/// Lenient semantic-version parsing: "2" and "2.5" are padded out to
/// "2.0.0" / "2.5.0" before strict parsing, preserving any prerelease or
/// build suffix.
fn parse_semver(value: &AttributeValue) -> Option<semver::Version> {
    let raw = value.as_str()?;
    if let Ok(version) = semver::Version::parse(raw) {
        return Some(version);
    }
    let caps = SEMVER_PAD.captures(raw)?;
    let padded = format!(
        "{}{}{}{}",
        caps.get(1).map(|m| m.as_str()).unwrap_or("0"),
        caps.get(2).map(|m| m.as_str()).unwrap_or(".0"),
        caps.get(3).map(|m| m.as_str()).unwrap_or(".0"),
        caps.get(4).map(|m| m.as_str()).unwrap_or(""),
    );
    semver::Version::parse(&padded).ok()
}

fn semver_op(
    context_value: &AttributeValue,
    clause_value: &AttributeValue,
    f: impl Fn(&semver::Version, &semver::Version) -> bool,
) -> bool {
    match (parse_semver(context_value), parse_semver(clause_value)) {
        (Some(a), Some(b)) => f(&a, &b),
        _ => false,
    }
}
