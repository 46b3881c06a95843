// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Private-attribute redaction. Runs at serialization time, immediately
//! before an event leaves the process; nothing upstream of this module ever
//! drops attribute data.

use beacon_types::{Context, SingleContext};
use serde_json::{json, Map, Value};

/// Serializes a context for an event payload, stripping every attribute
/// named by (a) the context's own private list, (b) the processor-wide
/// private list, or (c) all of them when `all_attributes_private` is set.
/// The names of removed attributes are recorded under `redactedAttributes`.
pub fn serialize_context_redacted(
    context: &Context,
    global_private: &[String],
    all_attributes_private: bool,
) -> Value {
    if !context.is_multi() {
        let part = context.parts()[0];
        return serialize_part(
            part,
            part.kind() != "user",
            global_private,
            all_attributes_private,
        );
    }

    let mut map = Map::new();
    map.insert("kind".to_string(), json!("multi"));
    for part in context.parts() {
        map.insert(
            part.kind().to_string(),
            serialize_part(part, false, global_private, all_attributes_private),
        );
    }
    Value::Object(map)
}

fn serialize_part(
    part: &SingleContext,
    include_kind: bool,
    global_private: &[String],
    all_attributes_private: bool,
) -> Value {
    let is_private = |name: &str| {
        all_attributes_private
            || global_private.iter().any(|p| p == name)
            || part.private_attribute_names().iter().any(|p| p == name)
    };

    let mut map = Map::new();
    if include_kind {
        map.insert("kind".to_string(), json!(part.kind()));
    }
    map.insert("key".to_string(), json!(part.key()));
    if part.anonymous() {
        map.insert("anonymous".to_string(), json!(true));
    }

    let mut custom = Map::new();
    let mut redacted: Vec<String> = Vec::new();
    for (name, value) in part.redactable_attributes() {
        if is_private(&name) {
            redacted.push(name);
            continue;
        }
        let value: Value = serde_json::to_value(&value).unwrap_or(Value::Null);
        if part.is_custom_attribute(&name) {
            custom.insert(name, value);
        } else {
            map.insert(name, value);
        }
    }
    // Names listed as private but not present still read as intent, not as
    // removals.
    if !custom.is_empty() {
        map.insert("custom".to_string(), Value::Object(custom));
    }
    if !redacted.is_empty() {
        redacted.sort();
        map.insert("redactedAttributes".to_string(), json!(redacted));
    }
    Value::Object(map)
}
