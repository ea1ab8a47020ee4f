// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::retry::RetryOptions;

/// Retry policy with no delay between attempts, for fast failure-path tests.
pub fn immediate_retries(max_attempts: u32) -> RetryOptions {
    RetryOptions { max_attempts, base_delay_ms: 0, max_delay_ms: 0 }
}

/// Payload factory: `{ "k": <v> }`.
pub fn payload(v: impl Into<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "k": v.into() })
}
