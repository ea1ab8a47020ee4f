// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The [`Agent`] trait: dispatched methods plus the overridable hook surface.

use async_trait::async_trait;
use burrow_core::ConnectionId;
use burrow_storage::{FiberRow, QueueRow, ScheduleRow, WorkflowRow};
use serde_json::Value;

use crate::error::{EngineError, HandlerError};
use crate::fiber::FiberHandle;
use crate::instance::Context;
use crate::rpc::StreamSink;
use crate::workflow::WorkflowCallback;

/// Where a state update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSource {
    /// The instance's own code (hooks, callbacks, RPC methods).
    Server,
    /// A client pushed a state-update frame.
    Connection(ConnectionId),
}

/// One method invocation delivered to [`Agent::call`].
pub struct Call<'a> {
    /// Callback or RPC method name.
    pub method: &'a str,
    /// Parsed payload. RPC calls carry the argument array.
    pub payload: Value,
    pub source: CallSource<'a>,
}

/// What triggered the invocation. Handlers mostly ignore this; streaming RPC
/// methods use [`CallSource::Rpc`] to reach their sink, and fiber methods use
/// [`CallSource::Fiber`] to stash checkpoints.
pub enum CallSource<'a> {
    Rpc {
        connection: &'a ConnectionId,
        stream: &'a StreamSink,
    },
    Schedule { row: &'a ScheduleRow },
    Queue { row: &'a QueueRow },
    Fiber { fiber: &'a FiberHandle },
}

/// An agent class: one `call` entry point for every dispatched method, plus
/// hooks the engine invokes at lifecycle points. Every hook has a default so
/// a minimal agent only implements `call`.
///
/// All methods take `&self`; durable state lives in the instance's store,
/// not in the struct, so the struct is shared freely across fiber tasks.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Dispatch a named method. Schedules, queue items, fibers, and RPC all
    /// arrive here; `call.source` says which.
    async fn call(&self, ctx: &Context, call: Call<'_>) -> Result<Value, HandlerError>;

    /// Whether `method` exists on this agent. Rows naming a missing method
    /// are reported and skipped instead of dispatched.
    fn has_method(&self, _method: &str) -> bool {
        true
    }

    /// Whether `method` may be invoked over RPC. Nothing is callable unless
    /// explicitly marked.
    fn is_callable(&self, _method: &str) -> bool {
        false
    }

    /// Class name announced in the identity frame.
    fn kind(&self) -> &str {
        "agent"
    }

    /// State used when nothing is persisted yet, and as the recovery target
    /// for a corrupt state row.
    fn initial_state(&self) -> Option<Value> {
        None
    }

    /// Synchronous gate for every state update. Err aborts the update before
    /// anything is persisted or broadcast.
    fn validate_state_change(
        &self,
        _next: &Value,
        _source: &StateSource,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Post-persist notification, delivered through the instance's deferred
    /// task queue after the broadcast has gone out.
    async fn on_state_changed(&self, _ctx: &Context, _state: &Value, _source: &StateSource) {}

    /// Terminal failures land here after retries are exhausted.
    async fn on_error(&self, error: &EngineError) {
        tracing::error!(%error, "unhandled agent error");
    }

    /// A fiber finished successfully.
    async fn on_fiber_complete(&self, _ctx: &Context, _fiber: &FiberRow) {}

    /// A recovery sweep found interrupted fibers. Default: recover each one
    /// individually via [`Agent::on_fiber_recovered`].
    async fn on_fibers_recovered(&self, ctx: &Context, interrupted: Vec<FiberRow>) {
        for fiber in &interrupted {
            self.on_fiber_recovered(ctx, fiber).await;
        }
    }

    /// One interrupted fiber. Default: restart it from its last snapshot.
    async fn on_fiber_recovered(&self, ctx: &Context, fiber: &FiberRow) {
        if let Err(error) = ctx.restart_fiber(fiber.id.as_str()).await {
            self.on_error(&error).await;
        }
    }

    /// Raw observer for every ingested workflow callback, invoked before the
    /// status machine runs.
    async fn on_workflow_callback(&self, _ctx: &Context, _callback: &WorkflowCallback) {}

    async fn on_workflow_progress(&self, _ctx: &Context, _row: &WorkflowRow, _progress: &Value) {}

    async fn on_workflow_complete(&self, _ctx: &Context, _row: &WorkflowRow, _result: &Value) {}

    async fn on_workflow_error(&self, _ctx: &Context, _row: &WorkflowRow) {}

    /// Opaque event forwarded from the external workflow. No local row
    /// transition is involved.
    async fn on_workflow_event(&self, _ctx: &Context, _workflow_id: &str, _event: &Value) {}

    /// Policy: should this connection be forbidden from sending state updates?
    fn should_connection_be_readonly(&self, _connection: &ConnectionId) -> bool {
        false
    }

    /// Policy: should this connection receive protocol frames at all?
    fn should_send_protocol_messages(&self, _connection: &ConnectionId) -> bool {
        true
    }

    async fn on_connect(&self, _ctx: &Context, _connection: &ConnectionId) {}

    async fn on_close(&self, _ctx: &Context, _connection: &ConnectionId) {}

    /// Frames that are not protocol frames (including ill-formed JSON) are
    /// handed over untouched.
    async fn on_message(&self, _ctx: &Context, _connection: &ConnectionId, _raw: &str) {}
}
