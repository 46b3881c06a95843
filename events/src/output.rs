// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Construction of the outbound event JSON. Schema notes: feature and custom
//! events reference contexts by key only; index, identify, and debug events
//! carry the (redacted) context inline.

use crate::{
    event::{CustomRecord, EvaluationRecord, IdentifyRecord},
    redaction::serialize_context_redacted,
};
use beacon_types::Context;
use serde_json::{json, Value};

/// Privacy settings applied wherever a context is serialized inline.
pub struct Redactor {
    pub global_private: Vec<String>,
    pub all_attributes_private: bool,
}

impl Redactor {
    pub fn redact(&self, context: &Context) -> Value {
        serialize_context_redacted(context, &self.global_private, self.all_attributes_private)
    }
}

pub fn feature_event(record: &EvaluationRecord, debug: bool, redactor: &Redactor) -> Value {
    let mut event = json!({
        "kind": if debug { "debug" } else { "feature" },
        "creationDate": record.creation_date,
        "key": record.flag_key,
        "value": serde_json::to_value(&record.value).unwrap_or(Value::Null),
        "default": serde_json::to_value(&record.default).unwrap_or(Value::Null),
    });
    let fields = event.as_object_mut().unwrap();
    if let Some(version) = record.flag_version {
        fields.insert("version".to_string(), json!(version));
    }
    if let Some(variation) = record.variation {
        fields.insert("variation".to_string(), json!(variation));
    }
    if debug {
        fields.insert("user".to_string(), redactor.redact(&record.context));
    } else {
        fields.insert(
            "userKey".to_string(),
            json!(record.context.canonical_key()),
        );
    }
    if record.include_reason || record.force_tracking || record.reason.is_in_experiment() {
        fields.insert(
            "reason".to_string(),
            serde_json::to_value(&record.reason).unwrap_or(Value::Null),
        );
    }
    if let Some(prereq_of) = &record.prereq_of {
        fields.insert("prereqOf".to_string(), json!(prereq_of));
    }
    event
}

pub fn index_event(creation_date: u64, context: &Context, redactor: &Redactor) -> Value {
    json!({
        "kind": "index",
        "creationDate": creation_date,
        "user": redactor.redact(context),
    })
}

pub fn identify_event(record: &IdentifyRecord, redactor: &Redactor) -> Value {
    json!({
        "kind": "identify",
        "creationDate": record.creation_date,
        "key": record.context.canonical_key(),
        "user": redactor.redact(&record.context),
    })
}

pub fn custom_event(record: &CustomRecord, inline: bool, redactor: &Redactor) -> Value {
    let mut event = json!({
        "kind": "custom",
        "creationDate": record.creation_date,
        "key": record.key,
    });
    let fields = event.as_object_mut().unwrap();
    if inline {
        fields.insert("user".to_string(), redactor.redact(&record.context));
    } else {
        fields.insert(
            "userKey".to_string(),
            json!(record.context.canonical_key()),
        );
    }
    if let Some(data) = &record.data {
        fields.insert(
            "data".to_string(),
            serde_json::to_value(data).unwrap_or(Value::Null),
        );
    }
    if let Some(metric_value) = record.metric_value {
        fields.insert("metricValue".to_string(), json!(metric_value));
    }
    event
}
