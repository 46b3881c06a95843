// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! The analytics event pipeline. Callers hand events to [`EventProcessor`]
//! through a bounded channel and never block; a single worker task owns all
//! mutable state (the summary, the output buffer, the context-key cache) and
//! hands finished payloads to a small pool of delivery tasks.

mod diagnostics;
mod event;
mod output;
mod processor;
mod redaction;
mod sender;
mod summary;

pub use diagnostics::DiagnosticsAccumulator;
pub use event::{CustomRecord, EvaluationRecord, IdentifyRecord, InputEvent};
pub use processor::EventProcessor;
pub use sender::EVENT_SCHEMA_VERSION;
