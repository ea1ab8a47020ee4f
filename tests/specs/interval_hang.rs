// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interval no-overlap and hang detection: a tick that finds the previous
//! execution still running is skipped until the hang timeout force-resets it.

use burrow_core::Clock;
use burrow_engine::test_support::harness;
use serde_json::json;

#[tokio::test]
async fn hung_interval_is_force_reset_after_timeout() {
    let h = harness();
    let row = h.instance.schedule_every(5, "noop", json!(null), None).unwrap();

    // First wake: the interval fires normally.
    h.clock.advance_secs(5);
    h.instance.on_alarm().await.unwrap();
    assert_eq!(h.agent.call_count("noop"), 1);

    // Simulate a callback that wedged: running flag set and never cleared.
    h.clock.advance_secs(5);
    let started = h.clock.epoch_secs();
    h.instance.store().mark_schedule_running(row.id.as_str(), started).unwrap();

    // Wakes within the 30s hang timeout skip the tick.
    h.clock.advance_secs(10);
    h.instance.on_alarm().await.unwrap();
    assert_eq!(h.agent.call_count("noop"), 1);
    assert!(h.instance.get_schedule(row.id.as_str()).unwrap().unwrap().running);

    // A wake at >= 30s since execution_started_at force-resets and re-runs.
    h.clock.advance_secs(20);
    h.instance.on_alarm().await.unwrap();
    assert_eq!(h.agent.call_count("noop"), 2);

    let reset = h.instance.get_schedule(row.id.as_str()).unwrap().unwrap();
    assert!(!reset.running);
    assert_eq!(reset.time, h.clock.epoch_secs() + 5);
}

#[tokio::test]
async fn overlapping_ticks_never_run_concurrently() {
    let h = harness();
    let row = h.instance.schedule_every(5, "noop", json!(null), None).unwrap();
    h.clock.advance_secs(5);
    h.instance
        .store()
        .mark_schedule_running(row.id.as_str(), h.clock.epoch_secs())
        .unwrap();

    // Several due wakes inside the hang window: all skipped.
    for _ in 0..3 {
        h.clock.advance_secs(5);
        h.instance.on_alarm().await.unwrap();
    }
    assert_eq!(h.agent.call_count("noop"), 0);
}
