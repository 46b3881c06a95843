// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The Beacon server-side SDK. The [`Client`] wires together the data
//! source, the stores, the evaluator, and the analytics pipeline, and exposes
//! the typed variation API the host application calls.
//!
//! ```no_run
//! use beacon_sdk::{Client, Config, Context};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::builder("my-sdk-key").build()?;
//! let client = Client::build(config);
//! client.start_with_timeout(Duration::from_secs(5)).await?;
//!
//! let context = Context::builder("user-key").name("Ada").build();
//! if client.bool_variation(&context, "new-checkout", false) {
//!     // serve the new flow
//! }
//! # Ok(())
//! # }
//! ```

mod all_flags;
mod client;
mod error;
mod providers;

pub use all_flags::{AllFlagsOptions, AllFlagsState};
pub use client::{Client, ClientBuilder};
pub use error::StartError;

pub use beacon_config::{Config, ConfigBuilder, ConfigError, DataSourceMode};
pub use beacon_types::{
    AttributeValue, BigSegmentsStatus, Context, ContextBuilder, ErrorKind, EvaluationDetail,
    MultiContextBuilder, Reason,
};
