// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Delivery of finished event payloads. One retry on transient failures,
//! with a stable payload id so the service can drop duplicates; a 401/403
//! disables the sender for the life of the process.

use beacon_config::{Config, SDK_USER_AGENT, WRAPPER_HEADER};
use chrono::DateTime;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, DATE};
use serde_json::Value;
use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};
use tracing::{error, warn};
use uuid::Uuid;

pub const EVENT_SCHEMA_VERSION: &str = "4";
const SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";
const PAYLOAD_ID_HEADER: &str = "X-LaunchDarkly-Payload-ID";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Failed after the retry; the payload is dropped but the sender stays
    /// usable.
    TransientFailure,
    /// 401/403: the sender is now permanently disabled.
    PermanentFailure,
}

pub struct EventSender {
    client: reqwest::Client,
    bulk_url: String,
    diagnostic_url: String,
    disabled: AtomicBool,
    /// Server clock from the most recent delivery response, epoch millis;
    /// zero until a response has been seen.
    server_time_ms: AtomicU64,
}

impl EventSender {
    pub fn new(config: &Config) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(mut auth) = HeaderValue::from_str(&config.sdk_key) {
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }
        if let Some(wrapper) = config.http.wrapper_header() {
            if let Ok(value) = HeaderValue::from_str(&wrapper) {
                headers.insert(WRAPPER_HEADER, value);
            }
        }
        let client = reqwest::Client::builder()
            .user_agent(SDK_USER_AGENT)
            .connect_timeout(config.http.connect_timeout)
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let base = config.endpoints.events_base().as_str().trim_end_matches('/');
        Self {
            client,
            bulk_url: format!("{}/bulk", base),
            diagnostic_url: format!("{}/diagnostic", base),
            disabled: AtomicBool::new(false),
            server_time_ms: AtomicU64::new(0),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// The service's clock as of the last successful delivery, if known.
    pub fn server_time_ms(&self) -> Option<u64> {
        match self.server_time_ms.load(Ordering::SeqCst) {
            0 => None,
            time => Some(time),
        }
    }

    pub async fn send_events(&self, events: &Value) -> SendOutcome {
        self.post(&self.bulk_url, events).await
    }

    pub async fn send_diagnostic(&self, payload: &Value) -> SendOutcome {
        self.post(&self.diagnostic_url, payload).await
    }

    async fn post(&self, url: &str, body: &Value) -> SendOutcome {
        if self.is_disabled() {
            return SendOutcome::PermanentFailure;
        }
        // The payload id stays the same across the retry so a duplicate
        // delivery can be discarded server-side.
        let payload_id = Uuid::new_v4().to_string();

        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }
            let response = self
                .client
                .post(url)
                .header(SCHEMA_HEADER, EVENT_SCHEMA_VERSION)
                .header(PAYLOAD_ID_HEADER, &payload_id)
                .json(body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    if let Some(server_time) = response
                        .headers()
                        .get(DATE)
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
                    {
                        self.server_time_ms
                            .store(server_time.timestamp_millis() as u64, Ordering::SeqCst);
                    }
                    return SendOutcome::Delivered;
                }
                Ok(response) => {
                    let status = response.status();
                    if matches!(status.as_u16(), 401 | 403) {
                        error!(
                            "event delivery returned {}; the SDK key is invalid, no further \
                             events will be sent",
                            status
                        );
                        self.disabled.store(true, Ordering::SeqCst);
                        return SendOutcome::PermanentFailure;
                    }
                    if !(status.is_server_error() || matches!(status.as_u16(), 408 | 429)) {
                        warn!("event delivery returned {}; dropping payload", status);
                        return SendOutcome::TransientFailure;
                    }
                    warn!("event delivery returned {}; will retry once", status);
                }
                Err(send_error) => {
                    warn!("event delivery failed: {}; will retry once", send_error);
                }
            }
        }
        warn!("event delivery failed after retry; dropping payload");
        SendOutcome::TransientFailure
    }
}
