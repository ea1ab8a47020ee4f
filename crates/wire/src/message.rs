// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame types for the bidirectional session protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors encoding an outbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Frames a client may send to the instance.
///
/// Anything that does not parse as one of these is handed to the agent's raw
/// message handler untouched, so [`Incoming::parse`] returns an `Option`
/// rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Incoming {
    /// Method invocation request.
    #[serde(rename = "rpc")]
    Rpc {
        id: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Client-pushed state update.
    #[serde(rename = "cf_agent_state")]
    SetState { state: Value },
}

impl Incoming {
    /// Parse a raw text frame, or `None` if it is not a protocol frame.
    pub fn parse(raw: &str) -> Option<Incoming> {
        serde_json::from_str(raw).ok()
    }
}

/// One response frame of an RPC exchange.
///
/// Non-streaming methods answer with a single `done: true` frame. Streaming
/// methods emit any number of `done: false` chunks and close with a terminal
/// `done: true` frame. Failures carry `success: false` and an error string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl RpcResponse {
    /// Terminal success frame.
    pub fn ok(id: impl Into<String>, result: Option<Value>) -> Self {
        Self { id: id.into(), success: true, result, error: None, done: Some(true) }
    }

    /// Intermediate streaming frame.
    pub fn chunk(id: impl Into<String>, result: Value) -> Self {
        Self { id: id.into(), success: true, result: Some(result), error: None, done: Some(false) }
    }

    /// Failure frame. The error is sanitized before it crosses the wire.
    pub fn err(id: impl Into<String>, error: &str) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(crate::sanitize_error(error)),
            done: None,
        }
    }
}

/// Frames the instance sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Outgoing {
    /// RPC response (terminal, chunk, or error).
    #[serde(rename = "rpc")]
    Rpc(RpcResponse),

    /// State broadcast to other attached sessions.
    #[serde(rename = "cf_agent_state")]
    State { state: Value },

    /// Rejected state update, sent only to the originating session.
    #[serde(rename = "cf_agent_state_error")]
    StateError { error: String },

    /// Identity announcement on connect.
    #[serde(rename = "cf_agent_identity")]
    Identity { name: String, agent: String },

    /// Snapshot of the MCP subsystem on connect.
    #[serde(rename = "cf_agent_mcp_servers")]
    McpServers { mcp: Value },
}

impl Outgoing {
    /// Serialize to a single text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
