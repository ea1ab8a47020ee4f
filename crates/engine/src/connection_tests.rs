// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{harness, harness_with, TestAgent, TestConnection};
use crate::AgentOptions;
use serde_json::json;

#[tokio::test]
async fn connect_sends_identity_state_and_mcp() {
    let h = harness();
    let conn = TestConnection::new();
    h.instance.connect("c1".into(), conn.clone()).await.unwrap();

    let frames = conn.frames_json();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["type"], json!("cf_agent_identity"));
    assert_eq!(frames[0]["name"], json!("test-instance"));
    assert_eq!(frames[0]["agent"], json!("TestAgent"));
    assert_eq!(frames[1]["type"], json!("cf_agent_state"));
    assert_eq!(frames[1]["state"], json!({"count": 0}));
    assert_eq!(frames[2]["type"], json!("cf_agent_mcp_servers"));
}

#[tokio::test]
async fn identity_frame_can_be_opted_out() {
    let h = harness_with(
        crate::test_support::TestAgent::new(),
        AgentOptions { send_identity_on_connect: false, ..AgentOptions::default() },
    );
    let conn = TestConnection::new();
    h.instance.connect("c1".into(), conn.clone()).await.unwrap();
    assert!(conn.frames_of_type("cf_agent_identity").is_empty());
    assert_eq!(conn.frames_of_type("cf_agent_state").len(), 1);
}

#[tokio::test]
async fn no_protocol_connection_gets_nothing_on_connect() {
    let agent = TestAgent::new();
    agent.silent_connections.lock().insert("quiet".into());
    let h = harness_with(agent, AgentOptions::default());

    let conn = TestConnection::new();
    h.instance.connect("quiet".into(), conn.clone()).await.unwrap();
    assert!(conn.frames().is_empty());
}

#[tokio::test]
async fn state_broadcast_reaches_peers_but_not_source() {
    let h = harness();
    let sender = TestConnection::new();
    let peer = TestConnection::new();
    h.instance.connect("sender".into(), sender.clone()).await.unwrap();
    h.instance.connect("peer".into(), peer.clone()).await.unwrap();
    sender.clear();
    peer.clear();

    h.instance
        .on_connection_message(&"sender".into(), r#"{"type":"cf_agent_state","state":{"count":9}}"#)
        .await
        .unwrap();

    // Peer got the broadcast, the origin did not.
    assert_eq!(peer.frames_of_type("cf_agent_state").len(), 1);
    assert!(sender.frames_of_type("cf_agent_state").is_empty());
}

#[tokio::test]
async fn no_protocol_connection_is_skipped_by_broadcasts() {
    let agent = TestAgent::new();
    agent.silent_connections.lock().insert("quiet".into());
    let h = harness_with(agent, AgentOptions::default());

    let quiet = TestConnection::new();
    h.instance.connect("quiet".into(), quiet.clone()).await.unwrap();
    h.instance.set_state(json!({"count": 3}), crate::StateSource::Server).await.unwrap();
    assert!(quiet.frames().is_empty());
}

#[tokio::test]
async fn readonly_connection_cannot_set_state() {
    let agent = TestAgent::new();
    agent.readonly_connections.lock().insert("ro".into());
    let h = harness_with(agent.clone(), AgentOptions::default());

    let ro = TestConnection::new();
    h.instance.connect("ro".into(), ro.clone()).await.unwrap();
    ro.clear();

    h.instance
        .on_connection_message(&"ro".into(), r#"{"type":"cf_agent_state","state":{"count":7}}"#)
        .await
        .unwrap();

    let errors = ro.frames_of_type("cf_agent_state_error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["error"], json!("State update rejected"));
    // Nothing persisted, no notification.
    assert_eq!(h.instance.state().unwrap(), Some(json!({"count": 0})));
    h.instance.drain_queue().await;
    assert!(agent.state_changes.lock().is_empty());
}

#[tokio::test]
async fn connection_state_wrapping_hides_internal_flags() {
    let agent = TestAgent::new();
    agent.readonly_connections.lock().insert("ro".into());
    let h = harness_with(agent, AgentOptions::default());
    let conn = TestConnection::new();
    h.instance.connect("ro".into(), conn).await.unwrap();
    let id: ConnectionId = "ro".into();

    // Internal flags never show up in user-visible state.
    assert_eq!(h.instance.connection_state(&id).unwrap(), json!({}));

    // User state round-trips while the readonly flag survives underneath.
    h.instance.set_connection_state(&id, json!({"user": "mia"})).unwrap();
    assert_eq!(h.instance.connection_state(&id).unwrap(), json!({"user": "mia"}));
    assert!(h.instance.is_connection_readonly(&id));

    // Internal keys in user input are discarded rather than honored.
    h.instance
        .set_connection_state(&id, json!({"user": "mia", "__burrow_readonly": false}))
        .unwrap();
    assert!(h.instance.is_connection_readonly(&id));
}

#[tokio::test]
async fn set_connection_readonly_round_trip() {
    let h = harness();
    let conn = TestConnection::new();
    h.instance.connect("c1".into(), conn).await.unwrap();
    let id: ConnectionId = "c1".into();

    h.instance.set_connection_readonly(&id, true).unwrap();
    assert!(h.instance.is_connection_readonly(&id));

    h.instance.set_connection_readonly(&id, false).unwrap();
    assert!(!h.instance.is_connection_readonly(&id));
    // Clearing removes the key entirely.
    let entry_keys: Vec<String> = {
        let connections = h.instance.core.connections.lock();
        connections.get(&id).unwrap().attachment.keys().cloned().collect()
    };
    assert!(entry_keys.is_empty());
}

#[tokio::test]
async fn non_protocol_frames_reach_raw_handler() {
    let h = harness();
    let conn = TestConnection::new();
    h.instance.connect("c1".into(), conn).await.unwrap();

    h.instance.on_connection_message(&"c1".into(), "plain text").await.unwrap();
    h.instance.on_connection_message(&"c1".into(), r#"{"type":"mystery"}"#).await.unwrap();

    assert_eq!(
        h.agent.raw_messages.lock().clone(),
        vec!["plain text".to_string(), r#"{"type":"mystery"}"#.to_string()]
    );
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let h = harness();
    let conn = TestConnection::new();
    h.instance.connect("c1".into(), conn).await.unwrap();
    h.instance.disconnect(&"c1".into()).await;
    h.instance.disconnect(&"c1".into()).await;
    assert!(h.instance.connection_ids().is_empty());
}
