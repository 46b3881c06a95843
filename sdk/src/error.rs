// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures of [`crate::Client::start_with_timeout`]. The client remains
/// usable in every case; these tell the host whether flag data is actually
/// flowing.
#[derive(Debug, Error)]
pub enum StartError {
    /// The wait elapsed before initial data arrived. The data source keeps
    /// trying in the background.
    #[error("the client did not initialize within the allotted time")]
    Timeout,

    /// The data source failed permanently (typically an invalid SDK key) and
    /// will never deliver data.
    #[error("the client could not initialize and will not retry")]
    InitializationFailed,

    /// `start_with_timeout` was called more than once.
    #[error("the client has already been started")]
    AlreadyStarted,
}
