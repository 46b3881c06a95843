// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use super::*;
use beacon_infallible::RwLock;
use beacon_types::{
    Clause, ClientSideAvailability, Prerequisite, Rollout, RolloutKind, Rule, Segment,
    SegmentRule, Target, WeightedVariation,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

#[derive(Default)]
struct FixedData {
    flags: RwLock<HashMap<String, Arc<StoreItem>>>,
    segments: RwLock<HashMap<String, Arc<StoreItem>>>,
}

impl FixedData {
    fn with_flag(self, flag: Flag) -> Self {
        self.flags
            .write()
            .insert(flag.key.clone(), Arc::new(StoreItem::Flag(flag)));
        self
    }

    fn with_segment(self, segment: Segment) -> Self {
        self.segments
            .write()
            .insert(segment.key.clone(), Arc::new(StoreItem::Segment(segment)));
        self
    }
}

impl DataProvider for FixedData {
    fn flag(&self, key: &str) -> Option<Arc<StoreItem>> {
        self.flags.read().get(key).cloned()
    }

    fn segment(&self, key: &str) -> Option<Arc<StoreItem>> {
        self.segments.read().get(key).cloned()
    }
}

struct FixedMembership {
    membership: Option<Arc<BigSegmentMembership>>,
    status: BigSegmentsStatus,
}

impl BigSegmentProvider for FixedMembership {
    fn query(&self, _context_key: &str) -> BigSegmentQuery {
        BigSegmentQuery {
            membership: self.membership.clone(),
            status: self.status,
        }
    }
}

fn two_variation_flag(key: &str) -> Flag {
    Flag {
        key: key.to_string(),
        version: 1,
        on: true,
        fallthrough: VariationOrRollout::fixed(1),
        off_variation: Some(0),
        variations: vec![AttributeValue::from("a"), AttributeValue::from("b")],
        salt: "salt".to_string(),
        client_side_availability: ClientSideAvailability::default(),
        ..Flag::default()
    }
}

fn match_all_clause() -> Clause {
    Clause {
        attribute: "key".to_string(),
        op: Operator::Matches,
        values: vec![AttributeValue::from(".*")],
        negate: false,
        context_kind: None,
    }
}

#[test]
fn test_off_flag_returns_off_variation() {
    let mut flag = two_variation_flag("f");
    flag.on = false;
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.value, AttributeValue::from("a"));
    assert_eq!(result.detail.variation_index, Some(0));
    assert_eq!(result.detail.reason, Reason::off());
}

#[test]
fn test_off_flag_without_off_variation_returns_null() {
    let mut flag = two_variation_flag("f");
    flag.on = false;
    flag.off_variation = None;
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.value, AttributeValue::Null);
    assert_eq!(result.detail.variation_index, None);
    assert_eq!(result.detail.reason, Reason::off());
}

#[test]
fn test_fallthrough_fixed_variation() {
    let flag = two_variation_flag("f");
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.value, AttributeValue::from("b"));
    assert_eq!(result.detail.variation_index, Some(1));
    assert_eq!(result.detail.reason, Reason::fallthrough(false));
    assert!(result.prerequisite_events.is_empty());
    assert!(!result.force_tracking);
}

#[test]
fn test_empty_context_key_is_an_error() {
    let flag = two_variation_flag("f");
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new(""));
    assert_eq!(
        result.detail.reason,
        Reason::error(ErrorKind::UserNotSpecified)
    );
}

#[test]
fn test_target_match_beats_rules() {
    let mut flag = two_variation_flag("f");
    flag.targets = vec![Target {
        values: vec!["u".to_string()],
        variation: 0,
    }];
    flag.rules = vec![Rule {
        id: "r".to_string(),
        variation_or_rollout: VariationOrRollout::fixed(1),
        clauses: vec![match_all_clause()],
        track_events: false,
    }];
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.reason, Reason::target_match());
    assert_eq!(result.detail.variation_index, Some(0));
}

#[test]
fn test_rule_match_with_clause() {
    let mut flag = two_variation_flag("f");
    flag.rules = vec![
        Rule {
            id: "first".to_string(),
            variation_or_rollout: VariationOrRollout::fixed(0),
            clauses: vec![Clause {
                attribute: "email".to_string(),
                op: Operator::EndsWith,
                values: vec![AttributeValue::from("@example.com")],
                negate: false,
                context_kind: None,
            }],
            track_events: false,
        },
        Rule {
            id: "second".to_string(),
            variation_or_rollout: VariationOrRollout::fixed(1),
            clauses: vec![match_all_clause()],
            track_events: false,
        },
    ];
    let data = FixedData::default();

    let matching = Context::builder("u").email("user@example.com").build();
    let result = Evaluator::new(&data).evaluate(&flag, &matching);
    assert_eq!(result.detail.reason, Reason::rule_match(0, "first", false));
    assert_eq!(result.detail.variation_index, Some(0));

    let other = Context::builder("u").email("user@other.com").build();
    let result = Evaluator::new(&data).evaluate(&flag, &other);
    assert_eq!(result.detail.reason, Reason::rule_match(1, "second", false));
}

#[test]
fn test_missing_attribute_never_matches_even_negated() {
    let mut flag = two_variation_flag("f");
    flag.rules = vec![Rule {
        id: "r".to_string(),
        variation_or_rollout: VariationOrRollout::fixed(0),
        clauses: vec![Clause {
            attribute: "email".to_string(),
            op: Operator::In,
            values: vec![AttributeValue::from("x")],
            negate: true,
            context_kind: None,
        }],
        track_events: false,
    }];
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    // no email attribute: the negated clause still does not match
    assert_eq!(result.detail.reason, Reason::fallthrough(false));
}

#[test]
fn test_prerequisite_failure_returns_off_variation() {
    let mut prerequisite = two_variation_flag("f1");
    prerequisite.on = false;
    prerequisite.off_variation = None;
    let mut flag = two_variation_flag("f0");
    flag.prerequisites = vec![Prerequisite {
        key: "f1".to_string(),
        variation: 1,
    }];
    let data = FixedData::default().with_flag(prerequisite);
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.reason, Reason::prerequisite_failed("f1"));
    assert_eq!(result.detail.variation_index, Some(0));
    // the prerequisite evaluation is reported for analytics
    assert_eq!(result.prerequisite_events.len(), 1);
    let event = &result.prerequisite_events[0];
    assert_eq!(event.flag_key, "f1");
    assert_eq!(event.prerequisite_of, "f0");
    assert_eq!(event.detail.reason, Reason::off());
}

#[test]
fn test_prerequisite_chain_event_order() {
    // f0 -> f1 -> f2, all passing; events come out innermost first
    let f2 = two_variation_flag("f2");
    let mut f1 = two_variation_flag("f1");
    f1.prerequisites = vec![Prerequisite {
        key: "f2".to_string(),
        variation: 1,
    }];
    let mut f0 = two_variation_flag("f0");
    f0.prerequisites = vec![Prerequisite {
        key: "f1".to_string(),
        variation: 1,
    }];
    let data = FixedData::default().with_flag(f1).with_flag(f2);
    let result = Evaluator::new(&data).evaluate(&f0, &Context::new("u"));
    assert_eq!(result.detail.reason, Reason::fallthrough(false));
    let keys: Vec<_> = result
        .prerequisite_events
        .iter()
        .map(|e| e.flag_key.as_str())
        .collect();
    assert_eq!(keys, vec!["f2", "f1"]);
}

#[test]
fn test_missing_prerequisite_fails_without_event() {
    let mut flag = two_variation_flag("f0");
    flag.prerequisites = vec![Prerequisite {
        key: "nonexistent".to_string(),
        variation: 0,
    }];
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(
        result.detail.reason,
        Reason::prerequisite_failed("nonexistent")
    );
    assert!(result.prerequisite_events.is_empty());
}

#[test]
fn test_prerequisite_cycle_is_malformed_flag() {
    let mut f0 = two_variation_flag("f0");
    f0.prerequisites = vec![Prerequisite {
        key: "f1".to_string(),
        variation: 1,
    }];
    let mut f1 = two_variation_flag("f1");
    f1.prerequisites = vec![Prerequisite {
        key: "f0".to_string(),
        variation: 1,
    }];
    let data = FixedData::default().with_flag(f0.clone()).with_flag(f1);
    let result = Evaluator::new(&data).evaluate(&f0, &Context::new("u"));
    assert_eq!(
        result.detail.reason,
        Reason::error(ErrorKind::MalformedFlag)
    );
}

#[test]
fn test_self_prerequisite_is_malformed_flag() {
    let mut flag = two_variation_flag("f0");
    flag.prerequisites = vec![Prerequisite {
        key: "f0".to_string(),
        variation: 1,
    }];
    let data = FixedData::default().with_flag(flag.clone());
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(
        result.detail.reason,
        Reason::error(ErrorKind::MalformedFlag)
    );
}

#[test]
fn test_out_of_range_variation_is_malformed_flag() {
    let mut flag = two_variation_flag("f");
    flag.fallthrough = VariationOrRollout::fixed(9);
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(
        result.detail.reason,
        Reason::error(ErrorKind::MalformedFlag)
    );
}

#[test]
fn test_empty_variation_or_rollout_is_malformed_flag() {
    let mut flag = two_variation_flag("f");
    flag.fallthrough = VariationOrRollout::default();
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(
        result.detail.reason,
        Reason::error(ErrorKind::MalformedFlag)
    );
}

#[test]
fn test_experiment_rollout_sets_in_experiment() {
    let mut flag = two_variation_flag("f");
    flag.fallthrough = VariationOrRollout {
        variation: None,
        rollout: Some(Rollout {
            kind: RolloutKind::Experiment,
            variations: vec![WeightedVariation {
                variation: 0,
                weight: 100_000,
                untracked: false,
            }],
            bucket_by: None,
            seed: None,
        }),
    };
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.reason, Reason::fallthrough(true));
    assert!(result.detail.reason.is_in_experiment());
}

#[test]
fn test_rule_track_events_forces_tracking() {
    let mut flag = two_variation_flag("f");
    flag.rules = vec![Rule {
        id: "r".to_string(),
        variation_or_rollout: VariationOrRollout::fixed(0),
        clauses: vec![match_all_clause()],
        track_events: true,
    }];
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert!(result.force_tracking);
}

fn segment_match_flag(segment_key: &str) -> Flag {
    let mut flag = two_variation_flag("f");
    flag.rules = vec![Rule {
        id: "segment-rule".to_string(),
        variation_or_rollout: VariationOrRollout::fixed(0),
        clauses: vec![Clause {
            attribute: "".to_string(),
            op: Operator::SegmentMatch,
            values: vec![AttributeValue::from(segment_key)],
            negate: false,
            context_kind: None,
        }],
        track_events: false,
    }];
    flag
}

#[test]
fn test_segment_included_and_excluded() {
    let segment = Segment {
        key: "seg".to_string(),
        version: 1,
        included: vec!["in-user".to_string()],
        excluded: vec!["out-user".to_string()],
        rules: vec![SegmentRule {
            clauses: vec![match_all_clause()],
            weight: None,
            bucket_by: None,
        }],
        ..Segment::default()
    };
    let flag = segment_match_flag("seg");
    let data = FixedData::default().with_segment(segment);
    let evaluator = Evaluator::new(&data);

    let included = evaluator.evaluate(&flag, &Context::new("in-user"));
    assert_eq!(included.detail.variation_index, Some(0));

    // excluded wins over the always-matching rule
    let excluded = evaluator.evaluate(&flag, &Context::new("out-user"));
    assert_eq!(excluded.detail.reason, Reason::fallthrough(false));

    // anyone else matches through the rule
    let other = evaluator.evaluate(&flag, &Context::new("other"));
    assert_eq!(other.detail.variation_index, Some(0));
}

#[test]
fn test_segment_match_with_missing_segment_is_no_match() {
    let flag = segment_match_flag("ghost");
    let data = FixedData::default();
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.reason, Reason::fallthrough(false));
}

#[test]
fn test_segment_rule_weight_gates_membership() {
    // weight 0: the bucket can never be below it
    let segment = Segment {
        key: "seg".to_string(),
        version: 1,
        salt: "salty".to_string(),
        rules: vec![SegmentRule {
            clauses: vec![match_all_clause()],
            weight: Some(0),
            bucket_by: None,
        }],
        ..Segment::default()
    };
    let flag = segment_match_flag("seg");
    let data = FixedData::default().with_segment(segment);
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.reason, Reason::fallthrough(false));
}

fn unbounded_segment() -> Segment {
    Segment {
        key: "big".to_string(),
        version: 1,
        unbounded: true,
        generation: Some(2),
        ..Segment::default()
    }
}

fn membership(included: &[&str], excluded: &[&str]) -> Arc<BigSegmentMembership> {
    Arc::new(BigSegmentMembership {
        included: included.iter().map(|s| s.to_string()).collect(),
        excluded: excluded.iter().map(|s| s.to_string()).collect(),
    })
}

#[test]
fn test_unbounded_segment_membership_lookup() {
    let flag = segment_match_flag("big");
    let data = FixedData::default().with_segment(unbounded_segment());

    let provider = FixedMembership {
        membership: Some(membership(&["big.g2"], &[])),
        status: BigSegmentsStatus::Healthy,
    };
    let result = Evaluator::new(&data)
        .with_big_segments(&provider)
        .evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.variation_index, Some(0));
    assert_eq!(
        result.detail.reason.big_segments_status(),
        Some(BigSegmentsStatus::Healthy)
    );
}

#[test]
fn test_unbounded_segment_exclusion_wins() {
    let flag = segment_match_flag("big");
    let data = FixedData::default().with_segment(unbounded_segment());
    let provider = FixedMembership {
        membership: Some(membership(&[], &["big.g2"])),
        status: BigSegmentsStatus::Healthy,
    };
    let result = Evaluator::new(&data)
        .with_big_segments(&provider)
        .evaluate(&flag, &Context::new("u"));
    assert_eq!(result.detail.reason, {
        Reason::fallthrough(false).with_big_segments_status(BigSegmentsStatus::Healthy)
    });
}

#[test]
fn test_unbounded_segment_stale_status_propagates() {
    let flag = segment_match_flag("big");
    let data = FixedData::default().with_segment(unbounded_segment());
    let provider = FixedMembership {
        membership: Some(membership(&["big.g2"], &[])),
        status: BigSegmentsStatus::Stale,
    };
    let result = Evaluator::new(&data)
        .with_big_segments(&provider)
        .evaluate(&flag, &Context::new("u"));
    assert_eq!(
        result.detail.reason.big_segments_status(),
        Some(BigSegmentsStatus::Stale)
    );
}

#[test]
fn test_unbounded_segment_without_provider_is_not_configured() {
    let flag = segment_match_flag("big");
    let data = FixedData::default().with_segment(unbounded_segment());
    let result = Evaluator::new(&data).evaluate(&flag, &Context::new("u"));
    assert_eq!(
        result.detail.reason.big_segments_status(),
        Some(BigSegmentsStatus::NotConfigured)
    );
    assert_eq!(result.detail.reason.error_kind(), None);
}

#[test]
fn test_same_inputs_same_outputs() {
    let mut flag = two_variation_flag("f");
    flag.fallthrough = VariationOrRollout {
        variation: None,
        rollout: Some(Rollout {
            kind: RolloutKind::Rollout,
            variations: vec![
                WeightedVariation {
                    variation: 0,
                    weight: 50_000,
                    untracked: false,
                },
                WeightedVariation {
                    variation: 1,
                    weight: 50_000,
                    untracked: false,
                },
            ],
            bucket_by: None,
            seed: None,
        }),
    };
    let data = FixedData::default();
    let evaluator = Evaluator::new(&data);
    let context = Context::builder("stable-user").email("e@x.io").build();
    let first = evaluator.evaluate(&flag, &context);
    for _ in 0..10 {
        let again = evaluator.evaluate(&flag, &context);
        assert_eq!(again.detail.value, first.detail.value);
        assert_eq!(again.detail.variation_index, first.detail.variation_index);
        assert_eq!(again.detail.reason, first.detail.reason);
    }
}
