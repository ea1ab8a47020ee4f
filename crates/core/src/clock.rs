// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Epoch clock abstraction for testable time handling.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time source for the runtime.
///
/// Everything durable is stamped in unix time: schedule due times and the
/// alarm deadline in whole seconds, row timestamps and retry arithmetic in
/// milliseconds. Nothing in the runtime needs monotonic instants, so the
/// trait is epoch-only and a fake clock is just a shared counter.
pub trait Clock: Clone + Send + Sync + 'static {
    fn epoch_ms(&self) -> u64;

    /// Second-granularity view of [`Clock::epoch_ms`], truncating.
    fn epoch_secs(&self) -> u64 {
        self.epoch_ms() / 1000
    }
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fake clock for tests: an epoch counter advanced by hand.
///
/// Clones share the counter, so the instance under test and the test body
/// observe the same time.
#[derive(Clone)]
pub struct FakeClock {
    epoch_ms: Arc<Mutex<u64>>,
}

impl FakeClock {
    /// Starts at a fixed, non-zero epoch so timestamps are stable across
    /// runs and subtraction never underflows.
    pub fn new() -> Self {
        Self { epoch_ms: Arc::new(Mutex::new(1_000_000_000)) }
    }

    pub fn advance(&self, duration: Duration) {
        *self.epoch_ms.lock() += duration.as_millis() as u64;
    }

    /// Advance the clock by whole seconds
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Jump to an absolute epoch-milliseconds value
    pub fn set_epoch_ms(&self, ms: u64) {
        *self.epoch_ms.lock() = ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn epoch_ms(&self) -> u64 {
        *self.epoch_ms.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
