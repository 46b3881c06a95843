// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures surfaced by a data store. The in-memory store never fails; the
/// persistent wrapper maps adapter and serialization failures here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn backend(error: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(error.into())
    }
}
