// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use super::*;
use beacon_config::ConfigBuilder;
use beacon_types::{AttributeValue, Reason};
use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use std::time::Instant;

fn now_ms() -> u64 {
    duration_since_epoch().as_millis() as u64
}

type Captured = Arc<Mutex<Vec<Value>>>;

/// Registers a mock for `/bulk` that records every payload it receives.
async fn capture_bulk(server: &MockServer, captured: &Captured, date_header: Option<String>) {
    let captured = captured.clone();
    server
        .mock_async(move |when, then| {
            when.method(POST).path("/bulk").matches(move |req| {
                if let Ok(value) = serde_json::from_slice::<Value>(&req.body().0) {
                    captured.lock().push(value);
                }
                true
            });
            let then = then.status(202);
            if let Some(date) = &date_header {
                then.header("date", date);
            }
        })
        .await;
}

fn test_config(server: &MockServer) -> beacon_config::Config {
    ConfigBuilder::new("sdk-key")
        .events_base_uri(server.base_url())
        .diagnostic_opt_out(true)
        .build()
        .unwrap()
}

fn evaluation(flag_key: &str, context: &Context) -> EvaluationRecord {
    EvaluationRecord {
        creation_date: now_ms(),
        context: context.clone(),
        flag_key: flag_key.to_string(),
        flag_version: Some(1),
        variation: Some(1),
        value: AttributeValue::from("b"),
        default: AttributeValue::from("x"),
        reason: Reason::fallthrough(false),
        track_events: false,
        force_tracking: false,
        include_reason: false,
        debug_events_until_date: None,
        prereq_of: None,
    }
}

fn identify(context: &Context) -> IdentifyRecord {
    IdentifyRecord {
        creation_date: now_ms(),
        context: context.clone(),
    }
}

async fn wait_for_payloads(captured: &Captured, count: usize) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let payloads = captured.lock();
            if payloads.len() >= count {
                return payloads.clone();
            }
        }
        assert!(
            Instant::now() < deadline,
            "expected {} payloads, have {}",
            count,
            captured.lock().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn kinds(payload: &Value) -> Vec<&str> {
    payload
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["kind"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_untracked_evaluation_yields_index_and_summary_only() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let processor = EventProcessor::new(&test_config(&server));
    processor.record_evaluation(evaluation("f", &Context::new("u")));
    processor.flush();

    let payloads = wait_for_payloads(&captured, 1).await;
    let payload = &payloads[0];
    assert_eq!(kinds(payload), vec!["index", "summary"]);

    assert_eq!(payload[0]["user"]["key"], "u");

    let counters = payload[1]["features"]["f"]["counters"].as_array().unwrap();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0]["count"], 1);
    assert_eq!(counters[0]["variation"], 1);
    processor.close().await;
}

#[tokio::test]
async fn test_tracked_evaluation_adds_feature_event() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let processor = EventProcessor::new(&test_config(&server));
    let mut record = evaluation("f", &Context::new("u"));
    record.track_events = true;
    processor.record_evaluation(record);
    processor.flush();

    let payloads = wait_for_payloads(&captured, 1).await;
    assert_eq!(kinds(&payloads[0]), vec!["index", "feature", "summary"]);
    let feature = &payloads[0][1];
    assert_eq!(feature["key"], "f");
    assert_eq!(feature["userKey"], "u");
    // tracking came from the flag-level switch, not a branch, so no reason
    assert_eq!(feature.get("reason"), None);
    processor.close().await;
}

#[tokio::test]
async fn test_forced_tracking_attaches_reason() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let processor = EventProcessor::new(&test_config(&server));
    let mut record = evaluation("f", &Context::new("u"));
    record.force_tracking = true;
    processor.record_evaluation(record);
    processor.flush();

    let payloads = wait_for_payloads(&captured, 1).await;
    let feature = &payloads[0][1];
    assert_eq!(feature["kind"], "feature");
    assert_eq!(feature["reason"], serde_json::json!({"kind": "FALLTHROUGH"}));
    processor.close().await;
}

#[tokio::test]
async fn test_context_keys_are_deduplicated() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let processor = EventProcessor::new(&test_config(&server));
    let context = Context::new("u");
    processor.record_evaluation(evaluation("f", &context));
    processor.record_evaluation(evaluation("f", &context));
    processor.record_evaluation(evaluation("g", &context));
    processor.flush();

    let payloads = wait_for_payloads(&captured, 1).await;
    assert_eq!(kinds(&payloads[0]), vec!["index", "summary"]);
    let counters = payloads[0][1]["features"]["f"]["counters"]
        .as_array()
        .unwrap();
    assert_eq!(counters[0]["count"], 2);
    processor.close().await;
}

#[tokio::test]
async fn test_context_key_window_resets() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let config = ConfigBuilder::new("sdk-key")
        .events_base_uri(server.base_url())
        .diagnostic_opt_out(true)
        .context_keys_flush_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let processor = EventProcessor::new(&config);
    let context = Context::new("u");

    processor.record_evaluation(evaluation("f", &context));
    processor.flush();
    wait_for_payloads(&captured, 1).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    processor.record_evaluation(evaluation("f", &context));
    processor.flush();

    let payloads = wait_for_payloads(&captured, 2).await;
    // the window reset, so the same key is introduced again
    assert!(kinds(&payloads[1]).contains(&"index"));
    processor.close().await;
}

#[tokio::test]
async fn test_debug_event_respects_server_clock() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    // the service clock runs one hour ahead of the local one
    let server_now_ms = now_ms() + 3_600_000;
    let date_header = Utc
        .timestamp_millis_opt(server_now_ms as i64)
        .unwrap()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    capture_bulk(&server, &captured, Some(date_header)).await;

    let processor = EventProcessor::new(&test_config(&server));

    // an initial delivery establishes the server time
    processor.record_identify(identify(&Context::new("u")));
    processor.flush();
    wait_for_payloads(&captured, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // still in the future locally, but already expired by the server clock
    let mut suppressed = evaluation("f", &Context::new("u"));
    suppressed.debug_events_until_date = Some(now_ms() + 1_800_000);
    processor.record_evaluation(suppressed);
    processor.flush();
    let payloads = wait_for_payloads(&captured, 2).await;
    assert!(!kinds(&payloads[1]).contains(&"debug"));

    // beyond both clocks: the debug event goes out, with the context inline
    let mut active = evaluation("f", &Context::new("u"));
    active.debug_events_until_date = Some(now_ms() + 7_200_000);
    processor.record_evaluation(active);
    processor.flush();
    let payloads = wait_for_payloads(&captured, 3).await;
    assert!(kinds(&payloads[2]).contains(&"debug"));
    processor.close().await;
}

#[tokio::test]
async fn test_full_buffer_drops_events() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let config = ConfigBuilder::new("sdk-key")
        .events_base_uri(server.base_url())
        .diagnostic_opt_out(true)
        .event_capacity(1)
        .build()
        .unwrap();
    let processor = EventProcessor::new(&config);
    for i in 0..5 {
        processor.record_identify(identify(&Context::new(format!("u{}", i))));
    }
    // let the worker drain the one-slot intake before asking for a flush,
    // since the flush request shares the channel
    tokio::time::sleep(Duration::from_millis(100)).await;
    processor.flush();

    let payloads = wait_for_payloads(&captured, 1).await;
    assert_eq!(payloads[0].as_array().unwrap().len(), 1);
    processor.close().await;
}

#[tokio::test]
async fn test_close_performs_final_flush() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    capture_bulk(&server, &captured, None).await;

    let processor = EventProcessor::new(&test_config(&server));
    processor.record_identify(identify(&Context::new("u")));
    processor.close().await;

    let payloads = wait_for_payloads(&captured, 1).await;
    assert_eq!(kinds(&payloads[0]), vec!["identify"]);

    // post-close records are discarded
    processor.record_identify(identify(&Context::new("v")));
    processor.flush();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(captured.lock().len(), 1);
}

#[tokio::test]
async fn test_unauthorized_delivery_disables_the_pipeline() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/bulk");
            then.status(401);
        })
        .await;

    let processor = EventProcessor::new(&test_config(&server));
    processor.record_identify(identify(&Context::new("u")));
    processor.flush();

    let deadline = Instant::now() + Duration::from_secs(5);
    while mock.hits_async().await == 0 {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // once disabled, nothing further reaches the network
    processor.record_identify(identify(&Context::new("v")));
    processor.flush();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.hits_async().await, 1);
    processor.close().await;
}

#[tokio::test]
async fn test_init_diagnostic_is_posted() {
    let server = MockServer::start_async().await;
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    {
        let captured = captured.clone();
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/diagnostic").matches(move |req| {
                    if let Ok(value) = serde_json::from_slice::<Value>(&req.body().0) {
                        captured.lock().push(value);
                    }
                    true
                });
                then.status(202);
            })
            .await;
    }

    let config = ConfigBuilder::new("sdk-key")
        .events_base_uri(server.base_url())
        .build()
        .unwrap();
    let processor = EventProcessor::new(&config);

    let payloads = wait_for_payloads(&captured, 1).await;
    assert_eq!(payloads[0]["kind"], "diagnostic-init");
    assert_eq!(payloads[0]["platform"]["name"], "rust");
    processor.close().await;
}

#[tokio::test]
async fn test_null_processor_is_inert() {
    let processor = EventProcessor::null();
    processor.record_identify(identify(&Context::new("u")));
    processor.flush();
    processor.close().await;
}
