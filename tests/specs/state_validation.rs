// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State validation at the protocol boundary: a rejected update sends a
//! generic error frame to the origin, broadcasts nothing, and never runs the
//! post-persist hook.

use std::sync::Arc;

use burrow_engine::test_support::{harness_with, TestAgent, TestConnection};
use burrow_engine::AgentOptions;
use serde_json::json;

#[tokio::test]
async fn rejected_update_sends_error_frame_and_no_broadcast() {
    let agent = Arc::new(TestAgent { validate_count: true, ..TestAgent::default() });
    let h = harness_with(agent.clone(), AgentOptions::default());

    let sender = TestConnection::new();
    let peer = TestConnection::new();
    h.instance.connect("sender".into(), sender.clone()).await.unwrap();
    h.instance.connect("peer".into(), peer.clone()).await.unwrap();
    sender.clear();
    peer.clear();

    h.instance
        .on_connection_message(
            &"sender".into(),
            r#"{"type":"cf_agent_state","state":{"count":-1,"who":"sender"}}"#,
        )
        .await
        .unwrap();

    // Origin gets the generic rejection, full details stay server-side.
    let errors = sender.frames_of_type("cf_agent_state_error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["error"], json!("State update rejected"));

    // No broadcast reached anyone.
    assert!(peer.frames_of_type("cf_agent_state").is_empty());
    assert!(sender.frames_of_type("cf_agent_state").is_empty());

    // State is untouched and on_state_changed never ran.
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 0})));
    h.instance.drain_queue().await;
    assert!(agent.state_changes.lock().is_empty());
}

#[tokio::test]
async fn accepted_update_broadcasts_and_notifies() {
    let agent = Arc::new(TestAgent { validate_count: true, ..TestAgent::default() });
    let h = harness_with(agent.clone(), AgentOptions::default());

    let sender = TestConnection::new();
    let peer = TestConnection::new();
    h.instance.connect("sender".into(), sender.clone()).await.unwrap();
    h.instance.connect("peer".into(), peer.clone()).await.unwrap();
    sender.clear();
    peer.clear();

    h.instance
        .on_connection_message(
            &"sender".into(),
            r#"{"type":"cf_agent_state","state":{"count":4}}"#,
        )
        .await
        .unwrap();

    let broadcasts = peer.frames_of_type("cf_agent_state");
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0]["state"], json!({"count": 4}));
    assert!(sender.frames_of_type("cf_agent_state").is_empty());

    h.instance.drain_queue().await;
    assert_eq!(agent.state_changes.lock().clone(), vec![json!({"count": 4})]);
}
