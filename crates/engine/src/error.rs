// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine and handler error types.

use burrow_core::ConnectionId;
use thiserror::Error;

/// Error returned by agent handler code (dispatched methods and hooks).
///
/// Handlers are user code; anything they report is a message, not a typed
/// condition. The engine decides whether it is retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// Errors from the instance runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Store(#[from] burrow_storage::StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] burrow_wire::ProtocolError),

    /// A dispatched callback failed after retry exhaustion.
    #[error("callback '{callback}' failed after {attempts} attempts: {error}")]
    CallbackFailed {
        callback: String,
        attempts: u32,
        error: HandlerError,
    },

    /// `validate_state_change` rejected the update.
    #[error("state update rejected: {0}")]
    StateRejected(HandlerError),

    #[error("connection {0} is readonly")]
    ReadonlyConnection(ConnectionId),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("callback name '{0}' is reserved")]
    ReservedCallback(String),

    #[error("no method '{0}' on this agent")]
    UnknownMethod(String),

    #[error("no workflow binding named '{0}'")]
    UnknownWorkflowBinding(String),

    #[error("unknown fiber: {0}")]
    UnknownFiber(String),

    #[error("workflow runtime error: {0}")]
    WorkflowRuntime(#[from] crate::workflow::WorkflowRuntimeError),

    #[error("instance has been destroyed")]
    Destroyed,
}
