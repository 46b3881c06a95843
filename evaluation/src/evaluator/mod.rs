// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::{
    bucketing::{self, context_bucketable_string},
    operators,
};
use beacon_store_interface::BigSegmentMembership;
use beacon_types::{
    AttributeValue, BigSegmentsStatus, Clause, Context, ErrorKind, EvaluationDetail, Flag,
    Operator, Reason, Segment, StoreItem, VariationOrRollout,
};
use std::sync::Arc;
use tracing::warn;

/// Read access to the active dataset. The evaluator only ever reads; the
/// data source owns all writes.
pub trait DataProvider: Send + Sync {
    fn flag(&self, key: &str) -> Option<Arc<StoreItem>>;
    fn segment(&self, key: &str) -> Option<Arc<StoreItem>>;
}

/// One big-segment membership lookup, with the store health observed while
/// making it.
pub struct BigSegmentQuery {
    pub membership: Option<Arc<BigSegmentMembership>>,
    pub status: BigSegmentsStatus,
}

/// Membership lookups for segments whose context sets live outside the main
/// dataset.
pub trait BigSegmentProvider: Send + Sync {
    fn query(&self, context_key: &str) -> BigSegmentQuery;
}

/// A prerequisite that was evaluated on the way to a result. The caller
/// turns each of these into an analytics record, in order, before the record
/// for the flag itself.
#[derive(Clone, Debug)]
pub struct PrerequisiteEvaluation {
    pub flag_key: String,
    pub flag_version: u64,
    pub track_events: bool,
    pub debug_events_until_date: Option<u64>,
    /// The flag that required this prerequisite.
    pub prerequisite_of: String,
    pub detail: EvaluationDetail<AttributeValue>,
    pub force_tracking: bool,
}

/// The full outcome of one evaluation.
#[derive(Clone, Debug)]
pub struct EvalResult {
    pub detail: EvaluationDetail<AttributeValue>,
    /// True when the matched rule or fallthrough has per-branch event
    /// tracking enabled, which upgrades the analytics record to a full event
    /// regardless of flag-level tracking.
    pub force_tracking: bool,
    pub prerequisite_events: Vec<PrerequisiteEvaluation>,
}

impl EvalResult {
    fn error(error_kind: ErrorKind) -> Self {
        Self {
            detail: EvaluationDetail::error(AttributeValue::Null, error_kind),
            force_tracking: false,
            prerequisite_events: Vec::new(),
        }
    }
}

/// The evaluation engine. Stateless and cheap to construct; per-call scratch
/// state lives in an internal scope so concurrent evaluations never share
/// anything mutable.
pub struct Evaluator<'a> {
    data: &'a dyn DataProvider,
    big_segments: Option<&'a dyn BigSegmentProvider>,
}

impl<'a> Evaluator<'a> {
    pub fn new(data: &'a dyn DataProvider) -> Self {
        Self {
            data,
            big_segments: None,
        }
    }

    pub fn with_big_segments(mut self, provider: &'a dyn BigSegmentProvider) -> Self {
        self.big_segments = Some(provider);
        self
    }

    pub fn evaluate(&self, flag: &Flag, context: &Context) -> EvalResult {
        if context.is_key_empty() {
            return EvalResult::error(ErrorKind::UserNotSpecified);
        }
        let mut scope = Scope {
            evaluator: self,
            context,
            stack: Vec::new(),
            prerequisite_events: Vec::new(),
            membership: None,
            big_segments_status: None,
        };
        let (mut detail, force_tracking) = scope.evaluate_flag(flag);
        if let Some(status) = scope.big_segments_status {
            detail.reason = detail.reason.with_big_segments_status(status);
        }
        EvalResult {
            detail,
            force_tracking,
            prerequisite_events: scope.prerequisite_events,
        }
    }
}

struct Scope<'a> {
    evaluator: &'a Evaluator<'a>,
    context: &'a Context,
    /// Flag keys currently being evaluated, outermost first. A key showing
    /// up twice means the prerequisite graph has a cycle.
    stack: Vec<String>,
    prerequisite_events: Vec<PrerequisiteEvaluation>,
    /// Big-segment membership is fetched at most once per evaluation.
    membership: Option<Option<Arc<BigSegmentMembership>>>,
    big_segments_status: Option<BigSegmentsStatus>,
}

impl<'a> Scope<'a> {
    fn evaluate_flag(&mut self, flag: &Flag) -> (EvaluationDetail<AttributeValue>, bool) {
        if self.stack.iter().any(|key| key == &flag.key) {
            warn!(
                "prerequisite cycle detected involving flag {:?}; returning malformed-flag error",
                flag.key
            );
            return (
                EvaluationDetail::error(AttributeValue::Null, ErrorKind::MalformedFlag),
                false,
            );
        }
        self.stack.push(flag.key.clone());
        let result = self.evaluate_flag_inner(flag);
        self.stack.pop();
        result
    }

    fn evaluate_flag_inner(&mut self, flag: &Flag) -> (EvaluationDetail<AttributeValue>, bool) {
        if !flag.on {
            return (off_detail(flag, Reason::off()), false);
        }

        if let Some(failed_key) = self.failed_prerequisite(flag) {
            return match failed_key {
                PrerequisiteOutcome::Failed(key) => {
                    (off_detail(flag, Reason::prerequisite_failed(key)), false)
                }
                PrerequisiteOutcome::Malformed => (
                    EvaluationDetail::error(AttributeValue::Null, ErrorKind::MalformedFlag),
                    false,
                ),
            };
        }

        if let Some(key) = self.context.key_for_kind(None) {
            for target in &flag.targets {
                if target.values.iter().any(|v| v == key) {
                    return (
                        variation_detail(flag, target.variation, Reason::target_match()),
                        false,
                    );
                }
            }
        }

        for (index, rule) in flag.rules.iter().enumerate() {
            if rule.clauses.iter().all(|c| self.clause_matches(c)) {
                let rule_id = rule.id.clone();
                return self.resolve_variation_or_rollout(
                    flag,
                    &rule.variation_or_rollout,
                    rule.track_events,
                    move |in_experiment| Reason::rule_match(index, rule_id, in_experiment),
                );
            }
        }

        self.resolve_variation_or_rollout(
            flag,
            &flag.fallthrough,
            flag.track_events_fallthrough,
            Reason::fallthrough,
        )
    }

    fn failed_prerequisite(&mut self, flag: &Flag) -> Option<PrerequisiteOutcome> {
        for prerequisite in &flag.prerequisites {
            let item = self.evaluator.data.flag(&prerequisite.key);
            let prerequisite_flag = match item.as_deref().and_then(StoreItem::as_flag) {
                Some(prerequisite_flag) => prerequisite_flag,
                None => return Some(PrerequisiteOutcome::Failed(prerequisite.key.clone())),
            };

            let (detail, force_tracking) = self.evaluate_flag(prerequisite_flag);
            if detail.reason.error_kind() == Some(ErrorKind::MalformedFlag) {
                return Some(PrerequisiteOutcome::Malformed);
            }

            let passed = prerequisite_flag.on
                && detail.variation_index == Some(prerequisite.variation);
            self.prerequisite_events.push(PrerequisiteEvaluation {
                flag_key: prerequisite_flag.key.clone(),
                flag_version: prerequisite_flag.version,
                track_events: prerequisite_flag.track_events,
                debug_events_until_date: prerequisite_flag.debug_events_until_date,
                prerequisite_of: flag.key.clone(),
                detail,
                force_tracking,
            });
            if !passed {
                return Some(PrerequisiteOutcome::Failed(prerequisite.key.clone()));
            }
        }
        None
    }

    fn resolve_variation_or_rollout(
        &mut self,
        flag: &Flag,
        variation_or_rollout: &VariationOrRollout,
        track_branch: bool,
        make_reason: impl FnOnce(bool) -> Reason,
    ) -> (EvaluationDetail<AttributeValue>, bool) {
        if let Some(index) = variation_or_rollout.variation {
            return (variation_detail(flag, index, make_reason(false)), track_branch);
        }
        if let Some(rollout) = &variation_or_rollout.rollout {
            if let Some(result) =
                bucketing::resolve_rollout(rollout, self.context, &flag.key, &flag.salt)
            {
                return (
                    variation_detail(flag, result.variation, make_reason(result.in_experiment)),
                    track_branch,
                );
            }
        }
        warn!(
            "flag {:?} has a rule or fallthrough with neither variation nor rollout",
            flag.key
        );
        (
            EvaluationDetail::error(AttributeValue::Null, ErrorKind::MalformedFlag),
            false,
        )
    }

    fn clause_matches(&mut self, clause: &Clause) -> bool {
        if clause.op == Operator::SegmentMatch {
            let matched = clause
                .values
                .iter()
                .filter_map(AttributeValue::as_str)
                .map(str::to_string)
                .any(|segment_key| self.segment_matches(&segment_key));
            return matched != clause.negate;
        }
        self.clause_matches_without_segments(clause)
    }

    /// Attribute-based clause matching. An absent attribute is a non-match
    /// regardless of negation.
    fn clause_matches_without_segments(&mut self, clause: &Clause) -> bool {
        let attribute_value = match self
            .context
            .attribute_by_kind(clause.context_kind.as_deref(), &clause.attribute)
        {
            Some(value) => value,
            None => return false,
        };
        let matched = attribute_value.iter_values().any(|context_value| {
            clause
                .values
                .iter()
                .any(|clause_value| operators::apply(&clause.op, context_value, clause_value))
        });
        matched != clause.negate
    }

    fn segment_matches(&mut self, segment_key: &str) -> bool {
        let item = self.evaluator.data.segment(segment_key);
        let segment = match item.as_deref().and_then(StoreItem::as_segment) {
            Some(segment) => segment,
            None => return false,
        };
        if segment.unbounded {
            self.unbounded_segment_matches(segment)
        } else {
            self.standard_segment_matches(segment)
        }
    }

    fn unbounded_segment_matches(&mut self, segment: &Segment) -> bool {
        if segment.generation.is_none() {
            // The store key is generation-qualified; without a generation
            // there is nothing to look up.
            self.note_big_segments_status(BigSegmentsStatus::NotConfigured);
            return false;
        }
        let reference = segment.reference();
        match self.membership() {
            Some(membership) => {
                if membership.included.contains(&reference) {
                    true
                } else if membership.excluded.contains(&reference) {
                    false
                } else {
                    self.segment_rules_match(segment)
                }
            }
            None => self.segment_rules_match(segment),
        }
    }

    fn membership(&mut self) -> Option<Arc<BigSegmentMembership>> {
        if self.membership.is_none() {
            let fetched = match self.evaluator.big_segments {
                Some(provider) => {
                    let key = self.context.canonical_key();
                    let query = provider.query(&key);
                    self.note_big_segments_status(query.status);
                    query.membership
                }
                None => {
                    self.note_big_segments_status(BigSegmentsStatus::NotConfigured);
                    None
                }
            };
            self.membership = Some(fetched);
        }
        self.membership.as_ref().unwrap().clone()
    }

    fn note_big_segments_status(&mut self, status: BigSegmentsStatus) {
        fn rank(status: BigSegmentsStatus) -> u8 {
            match status {
                BigSegmentsStatus::Healthy => 0,
                BigSegmentsStatus::Stale => 1,
                BigSegmentsStatus::NotConfigured => 2,
                BigSegmentsStatus::StoreError => 3,
            }
        }
        self.big_segments_status = Some(match self.big_segments_status {
            Some(current) if rank(current) >= rank(status) => current,
            _ => status,
        });
    }

    fn standard_segment_matches(&mut self, segment: &Segment) -> bool {
        if let Some(key) = self.context.key_for_kind(None) {
            if segment.included.iter().any(|k| k == key) {
                return true;
            }
        }
        for target in &segment.included_contexts {
            if let Some(key) = self.context.key_for_kind(Some(&target.context_kind)) {
                if target.values.iter().any(|k| k == key) {
                    return true;
                }
            }
        }
        if let Some(key) = self.context.key_for_kind(None) {
            if segment.excluded.iter().any(|k| k == key) {
                return false;
            }
        }
        for target in &segment.excluded_contexts {
            if let Some(key) = self.context.key_for_kind(Some(&target.context_kind)) {
                if target.values.iter().any(|k| k == key) {
                    return false;
                }
            }
        }
        self.segment_rules_match(segment)
    }

    fn segment_rules_match(&mut self, segment: &Segment) -> bool {
        // Segment rules cannot reference other segments, so segmentMatch
        // clauses inside them never match.
        segment.rules.iter().any(|rule| {
            if !rule
                .clauses
                .iter()
                .all(|clause| self.clause_matches_without_segments(clause))
            {
                return false;
            }
            match rule.weight {
                None => true,
                Some(weight) => {
                    let bucket_by = rule.bucket_by.as_deref().unwrap_or("key");
                    let bucket = context_bucketable_string(self.context, bucket_by)
                        .map(|value| {
                            bucketing::bucket_value(None, &segment.key, &segment.salt, &value)
                        })
                        .unwrap_or(0.0);
                    bucket < f64::from(weight) / 100_000.0
                }
            }
        })
    }
}

enum PrerequisiteOutcome {
    Failed(String),
    Malformed,
}

fn variation_detail(
    flag: &Flag,
    index: usize,
    reason: Reason,
) -> EvaluationDetail<AttributeValue> {
    match flag.variation_value(index) {
        Some(value) => EvaluationDetail::new(value.clone(), Some(index), reason),
        None => {
            warn!(
                "flag {:?} references nonexistent variation index {}",
                flag.key, index
            );
            EvaluationDetail::error(AttributeValue::Null, ErrorKind::MalformedFlag)
        }
    }
}

fn off_detail(flag: &Flag, reason: Reason) -> EvaluationDetail<AttributeValue> {
    match flag.off_variation {
        Some(index) => variation_detail(flag, index, reason),
        None => EvaluationDetail::new(AttributeValue::Null, None, reason),
    }
}

#[cfg(test)]
mod evaluator_test;
