// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A checkpointing fiber survives process death: the first "process" is a
//! tokio runtime that gets dropped mid-run, the second rehydrates the same
//! database and recovers the interrupted fiber.

use std::sync::Arc;
use std::time::Duration;

use burrow_core::FakeClock;
use burrow_engine::test_support::{TestAgent, TestWorkflowRuntime};
use burrow_engine::{AgentOptions, FiberStatus, Instance, SpawnFiberOptions};
use burrow_storage::Store;
use serde_json::json;

fn make_instance(path: &std::path::Path) -> (Instance, Arc<TestAgent>) {
    let agent = TestAgent::new();
    let store = Store::open(path).unwrap();
    let instance = Instance::new(
        "durable-1",
        agent.clone(),
        TestWorkflowRuntime::with_bindings(&[]),
        store,
        AgentOptions::default(),
        FakeClock::new(),
    )
    .unwrap();
    (instance, agent)
}

#[test]
fn slow_fiber_survives_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("agent.db");

    // First process: start a 10-step fiber that takes its time, then die
    // with it mid-flight.
    let first_life = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let fiber_id = first_life.block_on(async {
        let (instance, _agent) = make_instance(&db);
        let row = instance
            .spawn_fiber(
                "slow_steps",
                json!({"total_steps": 10, "step_delay_ms": 25}),
                SpawnFiberOptions::default(),
            )
            .unwrap();

        // Wait until a few steps are checkpointed.
        loop {
            let current = instance.get_fiber(row.id.as_str()).unwrap().unwrap();
            let steps = current
                .snapshot
                .as_ref()
                .and_then(|s| s.get("completed_steps"))
                .and_then(|s| s.as_array())
                .map(|s| s.len())
                .unwrap_or(0);
            if steps >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        row.id
    });
    // Dropping the runtime aborts every task: the fiber executor dies with
    // its row still marked running.
    drop(first_life);

    // Second process: rehydrate, trigger the recovery sweep, and watch the
    // fiber finish from its snapshot.
    let second_life = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    second_life.block_on(async {
        let (instance, agent) = make_instance(&db);
        let before = instance.get_fiber(fiber_id.as_str()).unwrap().unwrap();
        assert_eq!(before.status, FiberStatus::Running);

        instance.check_fibers().await.unwrap();

        let mut done = None;
        for _ in 0..2_000 {
            let current = instance.get_fiber(fiber_id.as_str()).unwrap().unwrap();
            if current.status == FiberStatus::Completed {
                done = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let done = done.expect("fiber completed after recovery");

        let steps = done.snapshot.unwrap()["completed_steps"].as_array().unwrap().len();
        assert_eq!(steps, 10);
        assert!(done.retry_count >= 1, "recovery increments the retry counter");
        assert_eq!(
            agent.recovered_fibers.lock().clone(),
            vec![fiber_id.to_string()]
        );
    });
}
