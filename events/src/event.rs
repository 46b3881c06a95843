// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use beacon_types::{AttributeValue, Context, Reason};

/// One flag evaluation as reported to the pipeline. The caller (the client
/// façade) fills in everything the worker needs so that the worker never has
/// to consult the data store.
#[derive(Clone, Debug)]
pub struct EvaluationRecord {
    pub creation_date: u64,
    pub context: Context,
    pub flag_key: String,
    /// Absent when the flag was missing or the client was not ready.
    pub flag_version: Option<u64>,
    pub variation: Option<usize>,
    pub value: AttributeValue,
    pub default: AttributeValue,
    pub reason: Reason,
    /// Flag-level tracking switch.
    pub track_events: bool,
    /// Branch-level (rule / fallthrough) tracking, which also attaches the
    /// reason to the emitted event.
    pub force_tracking: bool,
    /// The caller used a `_detail` method, so the reason travels with the
    /// event.
    pub include_reason: bool,
    pub debug_events_until_date: Option<u64>,
    /// Set when this evaluation happened on behalf of another flag's
    /// prerequisite check.
    pub prereq_of: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IdentifyRecord {
    pub creation_date: u64,
    pub context: Context,
}

#[derive(Clone, Debug)]
pub struct CustomRecord {
    pub creation_date: u64,
    pub context: Context,
    pub key: String,
    pub data: Option<AttributeValue>,
    pub metric_value: Option<f64>,
}

#[derive(Clone, Debug)]
pub enum InputEvent {
    Evaluation(EvaluationRecord),
    Identify(IdentifyRecord),
    Custom(CustomRecord),
}
