// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use crate::event::EvaluationRecord;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Per-flush-window aggregation of evaluations: one counter per
/// `(flag key, variation, flag version)`, with error/default results (no
/// variation) counted separately under an `unknown` marker.
#[derive(Default)]
pub struct SummaryBuilder {
    start_date: Option<u64>,
    end_date: u64,
    counters: HashMap<CounterKey, Counter>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    flag_key: String,
    variation: Option<usize>,
    version: Option<u64>,
}

struct Counter {
    count: u64,
    value: Value,
    default: Value,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn add(&mut self, record: &EvaluationRecord) {
        self.start_date = Some(match self.start_date {
            Some(start) => start.min(record.creation_date),
            None => record.creation_date,
        });
        self.end_date = self.end_date.max(record.creation_date);

        let key = CounterKey {
            flag_key: record.flag_key.clone(),
            variation: record.variation,
            version: record.flag_version,
        };
        let counter = self.counters.entry(key).or_insert_with(|| Counter {
            count: 0,
            value: serde_json::to_value(&record.value).unwrap_or(Value::Null),
            default: serde_json::to_value(&record.default).unwrap_or(Value::Null),
        });
        counter.count += 1;
    }

    /// Renders the summary event and resets the builder for the next window.
    pub fn build_event(&mut self) -> Value {
        let mut features: Map<String, Value> = Map::new();
        for (key, counter) in self.counters.drain() {
            let mut entry = json!({
                "count": counter.count,
                "value": counter.value,
            });
            let fields = entry.as_object_mut().unwrap();
            match (key.variation, key.version) {
                (variation, Some(version)) => {
                    if let Some(variation) = variation {
                        fields.insert("variation".to_string(), json!(variation));
                    }
                    fields.insert("version".to_string(), json!(version));
                }
                // No version means the flag was unknown to the store.
                (_, None) => {
                    fields.insert("unknown".to_string(), json!(true));
                }
            }

            let feature = features
                .entry(key.flag_key.clone())
                .or_insert_with(|| json!({"default": counter.default, "counters": []}));
            feature
                .get_mut("counters")
                .and_then(Value::as_array_mut)
                .unwrap()
                .push(entry);
        }

        let event = json!({
            "kind": "summary",
            "startDate": self.start_date.unwrap_or(0),
            "endDate": self.end_date,
            "features": features,
        });
        self.start_date = None;
        self.end_date = 0;
        event
    }
}
