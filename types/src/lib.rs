// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Data model shared by every component of the SDK: flags, segments, the
//! rule AST, evaluation contexts, and the evaluation result types. All of the
//! wire (de)serialization for these types lives here so that the data source,
//! the stores, and the event pipeline agree on a single JSON mapping.

mod attribute_value;
mod clause;
mod context;
mod data_kind;
mod flag;
mod reason;
mod segment;

pub use attribute_value::AttributeValue;
pub use clause::{Clause, Operator};
pub use context::{Context, ContextBuilder, MultiContextBuilder, SingleContext};
pub use data_kind::{AllData, StoreDataKind, StoreItem};
pub use flag::{
    ClientSideAvailability, Flag, Prerequisite, Rollout, RolloutKind, Rule, Target,
    VariationOrRollout, WeightedVariation,
};
pub use reason::{BigSegmentsStatus, ErrorKind, EvaluationDetail, Reason};
pub use segment::{Segment, SegmentRule, SegmentTarget};
