// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue retry exhaustion: exactly maxAttempts attempts, the row is deleted,
//! and one terminal error reaches `on_error`.

use std::collections::HashSet;
use std::sync::Arc;

use burrow_core::test_support::immediate_retries;
use burrow_engine::test_support::{harness_with, TestAgent};
use burrow_engine::AgentOptions;
use serde_json::json;

#[tokio::test]
async fn queue_retry_exhaustion_deletes_row_and_reports_once() {
    let agent = Arc::new(TestAgent {
        failing: HashSet::from(["throwing_callback".to_string()]),
        ..TestAgent::default()
    });
    let h = harness_with(
        agent.clone(),
        AgentOptions { retry: immediate_retries(3), ..AgentOptions::default() },
    );

    let id = h.instance.queue("throwing_callback", json!({"v": "x"}), None).unwrap();
    h.instance.drain_queue().await;

    assert_eq!(agent.call_count("throwing_callback"), 3);
    assert!(h.instance.get_queue(&id).unwrap().is_none());

    let errors = agent.errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("throwing_callback"));
    assert!(errors[0].contains("3 attempts"));
}

#[tokio::test]
async fn drain_continues_past_exhausted_items() {
    let agent = Arc::new(TestAgent {
        failing: HashSet::from(["throwing_callback".to_string()]),
        ..TestAgent::default()
    });
    let h = harness_with(
        agent.clone(),
        AgentOptions { retry: immediate_retries(3), ..AgentOptions::default() },
    );

    h.instance.queue("throwing_callback", json!(1), None).unwrap();
    h.clock.advance(std::time::Duration::from_millis(1));
    h.instance.queue("echo", json!({"after": true}), None).unwrap();
    h.instance.drain_queue().await;

    assert_eq!(agent.call_count("echo"), 1);
    assert!(h.instance.queued_items().unwrap().is_empty());
}
