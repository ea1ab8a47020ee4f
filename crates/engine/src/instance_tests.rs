// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::harness;
use crate::{EngineError, ScheduleWhen, SpawnFiberOptions, StateSource};
use serde_json::json;

#[tokio::test]
async fn destroy_drops_tables_and_short_circuits_entry_points() {
    let h = harness();
    h.instance.set_state(json!({"count": 1}), StateSource::Server).await.unwrap();
    h.instance.schedule(ScheduleWhen::Delay(5), "noop", json!(null), None).unwrap();
    h.instance
        .spawn_fiber("slow_steps", json!({"total_steps": 1000, "step_delay_ms": 5}), SpawnFiberOptions::default())
        .unwrap();

    h.instance.destroy().unwrap();
    assert!(h.instance.is_destroyed());
    assert_eq!(h.instance.next_wake(), None);

    // Every entry point refuses or no-ops.
    assert!(matches!(
        h.instance.set_state(json!({}), StateSource::Server).await,
        Err(EngineError::Destroyed)
    ));
    assert!(matches!(
        h.instance.schedule(ScheduleWhen::Delay(1), "noop", json!(null), None),
        Err(EngineError::Destroyed)
    ));
    assert!(matches!(h.instance.queue("noop", json!(null), None), Err(EngineError::Destroyed)));
    assert!(h.instance.on_alarm().await.is_ok());
    h.instance.drain_queue().await;
    assert!(h.agent.calls.lock().iter().all(|(m, _)| m != "noop"));
}

#[tokio::test]
async fn alarm_wakes_for_due_schedule_through_run_alarm() {
    let h = harness();
    // Schedule due in the past relative to the fake clock once advanced.
    h.instance.schedule(ScheduleWhen::Delay(1), "noop", json!(null), None).unwrap();
    h.clock.advance_secs(2);

    let instance = h.instance.clone();
    let driver = tokio::spawn(async move { instance.run_alarm().await });

    // The deadline is already due, so the loop fires promptly.
    for _ in 0..2_000 {
        if h.agent.call_count("noop") == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    assert_eq!(h.agent.call_count("noop"), 1);

    h.instance.destroy().unwrap();
    driver.await.unwrap();
}

#[tokio::test]
async fn mcp_snapshot_round_trip() {
    let h = harness();
    assert_eq!(h.instance.mcp_snapshot()["servers"], json!({}));
    h.instance.set_mcp_snapshot(json!({"servers": {"a": {}}}));
    assert_eq!(h.instance.mcp_snapshot(), json!({"servers": {"a": {}}}));
}

#[tokio::test]
async fn instance_name_is_exposed() {
    let h = harness();
    assert_eq!(h.instance.name(), "test-instance");
}
