// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy shared by schedules, queue items, and fibers.
//!
//! Every durable row may carry its own serialized override; resolution order
//! is row override, then per-class defaults, then the framework defaults of
//! 3 attempts / 100 ms base / 3 s cap.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Framework default: attempts per callback invocation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Framework default: first-retry delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
/// Framework default: backoff cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 3_000;

/// Retry policy for a single callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryOptions {
    /// Resolve the effective policy: row override > class default > framework default.
    pub fn resolve(row: Option<RetryOptions>, class: Option<RetryOptions>) -> RetryOptions {
        row.or(class).unwrap_or_default()
    }

    /// Delay before the given retry attempt (attempt 1 = first retry).
    ///
    /// Exponential in the attempt number with uniform jitter of up to half
    /// the computed delay, capped at `max_delay_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let jitter = if base >= 2 {
            rand::thread_rng().gen_range(0..base / 2)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter).min(self.max_delay_ms))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
