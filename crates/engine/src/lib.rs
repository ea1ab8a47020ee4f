// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! burrow-engine: the per-instance agent runtime.
//!
//! An [`Instance`] is a named, single-writer actor owning an embedded SQL
//! store and one next-wake alarm. On top of that it layers durable state
//! with change broadcasts, a priority-ordered scheduler (one-shot, delayed,
//! cron, interval), a durable task queue with retries, checkpointable fibers
//! that survive process eviction, and a session protocol with RPC.
//!
//! Transport is out of scope: the host hands inbound frames to
//! [`Instance::on_connection_message`] and drives the alarm either through
//! [`Instance::run_alarm`] or by calling [`Instance::on_alarm`] itself.

mod agent;
mod connection;
mod error;
mod fiber;
mod instance;
mod options;
mod queue;
mod rpc;
mod scheduler;
mod state;
mod workflow;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use agent::{Agent, Call, CallSource, StateSource};
pub use connection::ConnectionSink;
pub use error::{EngineError, HandlerError};
pub use fiber::{FiberHandle, SpawnFiberOptions};
pub use instance::{Context, Instance};
pub use options::AgentOptions;
pub use rpc::StreamSink;
pub use scheduler::ScheduleWhen;
pub use workflow::{
    RunWorkflowOptions, WorkflowCallback, WorkflowRuntime, WorkflowRuntimeError,
};

pub use burrow_core::{ConnectionId, FiberId, RetryOptions, ScheduleId, WorkflowId};
pub use burrow_storage::{
    FiberRow, FiberStatus, QueueRow, ScheduleCriteria, ScheduleKind, ScheduleRow, SortOrder,
    Store, StoreError, WorkflowCriteria, WorkflowPage, WorkflowRow, WorkflowStatus,
};
