// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{harness, harness_with, TestAgent};
use crate::{Agent, AgentOptions, Call, Context, HandlerError};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn first_read_seeds_initial_state() {
    let h = harness();
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 0})));
    // Seeding does not count as a user change.
    assert!(!h.instance.state_was_changed().unwrap());
}

#[tokio::test]
async fn set_state_persists_and_marks_changed() {
    let h = harness();
    h.instance.set_state(json!({"count": 5}), StateSource::Server).await.unwrap();
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 5})));
    assert!(h.instance.state_was_changed().unwrap());
}

#[tokio::test]
async fn validation_failure_aborts_before_persist() {
    let agent = Arc::new(TestAgent { validate_count: true, ..TestAgent::default() });
    let h = harness_with(agent.clone(), AgentOptions::default());
    h.instance.set_state(json!({"count": 1}), StateSource::Server).await.unwrap();

    let result = h.instance.set_state(json!({"count": -1}), StateSource::Server).await;
    assert!(matches!(result, Err(EngineError::StateRejected(_))));

    // Prior state intact, no notification enqueued for the rejected update.
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 1})));
    h.instance.drain_queue().await;
    assert_eq!(agent.state_changes.lock().len(), 1);
}

#[tokio::test]
async fn state_changed_hook_runs_after_persist() {
    let h = harness();
    h.instance.set_state(json!({"count": 2}), StateSource::Server).await.unwrap();
    h.instance.drain_queue().await;
    assert_eq!(h.agent.state_changes.lock().clone(), vec![json!({"count": 2})]);
}

#[tokio::test]
async fn corrupt_state_recovers_to_initial_state() {
    let h = harness();
    // Simulate a corrupt row written by an older process.
    h.instance.core.store.put_state_blob("{definitely not json").unwrap();
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 0})));
    // The recovery rewrote the row; the next read is clean.
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 0})));
}

#[tokio::test]
async fn corrupt_state_without_initial_state_clears_row() {
    struct Bare;
    #[async_trait::async_trait]
    impl Agent for Bare {
        async fn call(
            &self,
            _ctx: &Context,
            _call: Call<'_>,
        ) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::Value::Null)
        }
    }
    let store = burrow_storage::Store::open_in_memory().unwrap();
    let instance = Instance::new(
        "bare",
        Arc::new(Bare),
        crate::test_support::TestWorkflowRuntime::with_bindings(&[]),
        store,
        AgentOptions::default(),
        burrow_core::FakeClock::new(),
    )
    .unwrap();

    instance.core.store.put_state_blob("xx{").unwrap();
    assert_eq!(instance.state().unwrap(), None);
    assert_eq!(instance.core.store.state_blob().unwrap(), None);
}
