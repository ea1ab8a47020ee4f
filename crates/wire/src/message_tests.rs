// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn rpc_request_parses() {
    let frame = r#"{"type":"rpc","id":"r1","method":"add","args":[1,2]}"#;
    assert_eq!(
        Incoming::parse(frame),
        Some(Incoming::Rpc {
            id: "r1".into(),
            method: "add".into(),
            args: vec![json!(1), json!(2)],
        })
    );
}

#[test]
fn rpc_request_args_default_to_empty() {
    let frame = r#"{"type":"rpc","id":"r1","method":"ping"}"#;
    match Incoming::parse(frame) {
        Some(Incoming::Rpc { args, .. }) => assert!(args.is_empty()),
        other => panic!("unexpected parse: {other:?}"),
    }
}

#[test]
fn state_update_parses() {
    let frame = r#"{"type":"cf_agent_state","state":{"count":3}}"#;
    assert_eq!(
        Incoming::parse(frame),
        Some(Incoming::SetState { state: json!({"count": 3}) })
    );
}

#[test]
fn non_protocol_frames_fall_through() {
    assert_eq!(Incoming::parse("hello"), None);
    assert_eq!(Incoming::parse("{not json"), None);
    assert_eq!(Incoming::parse(r#"{"type":"something_else"}"#), None);
}

#[test]
fn rpc_ok_frame_shape() {
    let frame = Outgoing::Rpc(RpcResponse::ok("r1", Some(json!(3)))).encode().unwrap();
    let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(v, json!({"type":"rpc","id":"r1","success":true,"result":3,"done":true}));
}

#[test]
fn rpc_chunk_then_terminal() {
    let chunk = Outgoing::Rpc(RpcResponse::chunk("r1", json!("part"))).encode().unwrap();
    let v: serde_json::Value = serde_json::from_str(&chunk).unwrap();
    assert_eq!(v["done"], json!(false));

    let fin = Outgoing::Rpc(RpcResponse::ok("r1", None)).encode().unwrap();
    let v: serde_json::Value = serde_json::from_str(&fin).unwrap();
    assert_eq!(v["done"], json!(true));
    assert!(v.get("result").is_none());
}

#[test]
fn rpc_error_frame_is_sanitized() {
    let frame = Outgoing::Rpc(RpcResponse::err("r1", "bad\u{0007} call")).encode().unwrap();
    let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(v["success"], json!(false));
    assert_eq!(v["error"], json!("bad call"));
}

#[test]
fn server_frames_carry_literal_tags() {
    let cases = [
        (Outgoing::State { state: json!({"a":1}) }, "cf_agent_state"),
        (Outgoing::StateError { error: "State update rejected".into() }, "cf_agent_state_error"),
        (Outgoing::Identity { name: "inst-1".into(), agent: "Counter".into() }, "cf_agent_identity"),
        (Outgoing::McpServers { mcp: json!({"servers":{}}) }, "cf_agent_mcp_servers"),
    ];
    for (frame, tag) in cases {
        let v: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(v["type"], json!(tag));
    }
}
