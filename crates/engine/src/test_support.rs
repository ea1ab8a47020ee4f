// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: a scripted agent, a frame-capturing connection, and
//! a scripted workflow runtime.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use burrow_core::{ConnectionId, FakeClock};
use burrow_storage::{FiberRow, Store, WorkflowRow, WorkflowStatus};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::agent::{Agent, Call, CallSource, StateSource};
use crate::connection::ConnectionSink;
use crate::error::{EngineError, HandlerError};
use crate::instance::{Context, Instance};
use crate::options::AgentOptions;
use crate::workflow::{WorkflowCallback, WorkflowRuntime, WorkflowRuntimeError};

/// Scripted agent with built-in methods and full call/hook recording.
///
/// Built-ins:
/// - `echo` returns its payload
/// - `add` sums an RPC argument array of numbers
/// - `stream_numbers` streams `1..=n` chunks for payload `[n]`
/// - `slow_steps` is a checkpointing fiber method driven by
///   `{"total_steps": n}`, stashing `{"completed_steps": [...]}` per step and
///   optionally failing once at `{"fail_at_step": k}`
/// - `noop` returns null
#[derive(Default)]
pub struct TestAgent {
    /// Methods invocable over RPC.
    pub callable: HashSet<String>,
    /// Methods that fail on every call.
    pub failing: HashSet<String>,
    /// Methods that fail their first N calls.
    pub flaky: Mutex<HashMap<String, u32>>,
    /// When set, `has_method` only admits these names.
    pub known_methods: Option<HashSet<String>>,
    /// Reject state updates where `state["count"] == -1`.
    pub validate_count: bool,
    /// Connections forced readonly at attach time.
    pub readonly_connections: Mutex<HashSet<String>>,
    /// Connections attached with protocol frames suppressed.
    pub silent_connections: Mutex<HashSet<String>>,

    pub calls: Mutex<Vec<(String, Value)>>,
    pub state_changes: Mutex<Vec<Value>>,
    pub errors: Mutex<Vec<String>>,
    pub completed_fibers: Mutex<Vec<String>>,
    pub recovered_fibers: Mutex<Vec<String>>,
    pub workflow_progress: Mutex<Vec<(String, Value)>>,
    pub workflow_events: Mutex<Vec<(String, Value)>>,
    pub raw_messages: Mutex<Vec<String>>,
}

impl TestAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callable(methods: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            callable: methods.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        })
    }

    /// Make `method` fail its next `times` calls.
    pub fn fail_next(&self, method: &str, times: u32) {
        self.flaky.lock().insert(method.to_string(), times);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    async fn run_slow_steps(
        &self,
        payload: &Value,
        fiber: &crate::fiber::FiberHandle,
    ) -> Result<Value, HandlerError> {
        let total = payload.get("total_steps").and_then(Value::as_u64).unwrap_or(1);
        let fail_at = payload.get("fail_at_step").and_then(Value::as_u64);
        let step_delay_ms = payload.get("step_delay_ms").and_then(Value::as_u64).unwrap_or(0);

        let mut completed: Vec<u64> = fiber
            .resume_snapshot()
            .and_then(|s| s.get("completed_steps"))
            .and_then(Value::as_array)
            .map(|steps| steps.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();

        for step in completed.len() as u64..total {
            if fiber.is_cancelled().map_err(|e| HandlerError::new(e.to_string()))? {
                return Err(HandlerError::new("cancelled"));
            }
            if step_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(step_delay_ms)).await;
            }
            if fail_at == Some(step) && fiber.resume_snapshot().is_none() {
                return Err(HandlerError::new(format!("induced failure at step {step}")));
            }
            completed.push(step);
            fiber
                .stash(json!({ "completed_steps": completed }))
                .map_err(|e| HandlerError::new(e.to_string()))?;
        }
        Ok(json!({ "completed": completed.len() }))
    }
}

#[async_trait]
impl Agent for TestAgent {
    async fn call(&self, _ctx: &Context, call: Call<'_>) -> Result<Value, HandlerError> {
        self.calls.lock().push((call.method.to_string(), call.payload.clone()));

        let remaining = {
            let mut flaky = self.flaky.lock();
            match flaky.get_mut(call.method) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if remaining {
            return Err(HandlerError::new(format!("induced failure in {}", call.method)));
        }
        if self.failing.contains(call.method) {
            return Err(HandlerError::new(format!("{} always fails", call.method)));
        }

        match call.method {
            "echo" => Ok(call.payload),
            "add" => {
                let sum: f64 = call
                    .payload
                    .as_array()
                    .map(|args| args.iter().filter_map(Value::as_f64).sum())
                    .unwrap_or(0.0);
                Ok(json!(sum))
            }
            "stream_numbers" => {
                if let CallSource::Rpc { stream, .. } = &call.source {
                    let n = call
                        .payload
                        .as_array()
                        .and_then(|args| args.first())
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    for i in 1..=n {
                        stream.send(json!(i)).await;
                    }
                    stream.end(Some(json!({ "count": n }))).await;
                }
                Ok(Value::Null)
            }
            "slow_steps" => {
                if let CallSource::Fiber { fiber } = &call.source {
                    self.run_slow_steps(&call.payload, fiber).await
                } else {
                    Err(HandlerError::new("slow_steps must run as a fiber"))
                }
            }
            "noop" => Ok(Value::Null),
            other => Err(HandlerError::new(format!("no method '{other}'"))),
        }
    }

    fn has_method(&self, method: &str) -> bool {
        match &self.known_methods {
            Some(known) => known.contains(method),
            None => true,
        }
    }

    fn is_callable(&self, method: &str) -> bool {
        self.callable.contains(method)
    }

    fn kind(&self) -> &str {
        "TestAgent"
    }

    fn initial_state(&self) -> Option<Value> {
        Some(json!({ "count": 0 }))
    }

    fn validate_state_change(
        &self,
        next: &Value,
        _source: &StateSource,
    ) -> Result<(), HandlerError> {
        if self.validate_count && next.get("count") == Some(&json!(-1)) {
            return Err(HandlerError::new("count may not be -1"));
        }
        Ok(())
    }

    async fn on_state_changed(&self, _ctx: &Context, state: &Value, _source: &StateSource) {
        self.state_changes.lock().push(state.clone());
    }

    async fn on_error(&self, error: &EngineError) {
        self.errors.lock().push(error.to_string());
    }

    async fn on_fiber_complete(&self, _ctx: &Context, fiber: &FiberRow) {
        self.completed_fibers.lock().push(fiber.id.to_string());
    }

    async fn on_fiber_recovered(&self, ctx: &Context, fiber: &FiberRow) {
        self.recovered_fibers.lock().push(fiber.id.to_string());
        if let Err(error) = ctx.restart_fiber(fiber.id.as_str()).await {
            self.on_error(&error).await;
        }
    }

    async fn on_workflow_callback(&self, _ctx: &Context, _callback: &WorkflowCallback) {}

    async fn on_workflow_progress(&self, _ctx: &Context, row: &WorkflowRow, progress: &Value) {
        self.workflow_progress.lock().push((row.workflow_id.clone(), progress.clone()));
    }

    async fn on_workflow_event(&self, _ctx: &Context, workflow_id: &str, event: &Value) {
        self.workflow_events.lock().push((workflow_id.to_string(), event.clone()));
    }

    fn should_connection_be_readonly(&self, connection: &ConnectionId) -> bool {
        self.readonly_connections.lock().contains(connection.as_str())
    }

    fn should_send_protocol_messages(&self, connection: &ConnectionId) -> bool {
        !self.silent_connections.lock().contains(connection.as_str())
    }

    async fn on_message(&self, _ctx: &Context, _connection: &ConnectionId, raw: &str) {
        self.raw_messages.lock().push(raw.to_string());
    }
}

/// Connection sink that records every frame it is sent.
#[derive(Default)]
pub struct TestConnection {
    frames: Mutex<Vec<String>>,
}

impl TestConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn frames_json(&self) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Frames with the given `type` tag.
    pub fn frames_of_type(&self, tag: &str) -> Vec<Value> {
        self.frames_json()
            .into_iter()
            .filter(|f| f.get("type").and_then(Value::as_str) == Some(tag))
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

#[async_trait]
impl ConnectionSink for TestConnection {
    async fn send(&self, frame: String) {
        self.frames.lock().push(frame);
    }
}

/// Scripted external workflow runtime.
#[derive(Default)]
pub struct TestWorkflowRuntime {
    pub bindings: HashSet<String>,
    /// External status reported by `status()`.
    pub statuses: Mutex<HashMap<String, WorkflowStatus>>,
    /// Operations that answer `Unsupported`.
    pub unsupported_ops: HashSet<String>,
    /// Remaining `send_event` calls to fail transiently.
    pub transient_send_failures: Mutex<u32>,
    pub created: Mutex<Vec<(String, String, Value)>>,
    pub events: Mutex<Vec<(String, String, Value)>>,
    pub ops: Mutex<Vec<(String, String)>>,
}

impl TestWorkflowRuntime {
    pub fn with_bindings(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            bindings: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        })
    }

    fn check_supported(&self, op: &str) -> Result<(), WorkflowRuntimeError> {
        if self.unsupported_ops.contains(op) {
            return Err(WorkflowRuntimeError::Unsupported(op.to_string()));
        }
        Ok(())
    }

    fn set_status(&self, workflow_id: &str, status: WorkflowStatus) {
        self.statuses.lock().insert(workflow_id.to_string(), status);
    }
}

#[async_trait]
impl WorkflowRuntime for TestWorkflowRuntime {
    fn has_binding(&self, name: &str) -> bool {
        self.bindings.contains(name)
    }

    async fn create(
        &self,
        name: &str,
        workflow_id: &str,
        params: Value,
    ) -> Result<(), WorkflowRuntimeError> {
        self.created.lock().push((name.to_string(), workflow_id.to_string(), params));
        self.set_status(workflow_id, WorkflowStatus::Queued);
        Ok(())
    }

    async fn send_event(
        &self,
        name: &str,
        workflow_id: &str,
        event: Value,
    ) -> Result<(), WorkflowRuntimeError> {
        {
            let mut failures = self.transient_send_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(WorkflowRuntimeError::Transient("runtime briefly unavailable".into()));
            }
        }
        self.events.lock().push((name.to_string(), workflow_id.to_string(), event));
        Ok(())
    }

    async fn status(
        &self,
        _name: &str,
        workflow_id: &str,
    ) -> Result<WorkflowStatus, WorkflowRuntimeError> {
        Ok(self
            .statuses
            .lock()
            .get(workflow_id)
            .copied()
            .unwrap_or(WorkflowStatus::Unknown))
    }

    async fn terminate(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError> {
        self.check_supported("terminate")?;
        self.ops.lock().push(("terminate".to_string(), workflow_id.to_string()));
        let _ = name;
        self.set_status(workflow_id, WorkflowStatus::Terminated);
        Ok(())
    }

    async fn pause(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError> {
        self.check_supported("pause")?;
        self.ops.lock().push(("pause".to_string(), workflow_id.to_string()));
        let _ = name;
        self.set_status(workflow_id, WorkflowStatus::Paused);
        Ok(())
    }

    async fn resume(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError> {
        self.check_supported("resume")?;
        self.ops.lock().push(("resume".to_string(), workflow_id.to_string()));
        let _ = name;
        self.set_status(workflow_id, WorkflowStatus::Running);
        Ok(())
    }

    async fn restart(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError> {
        self.check_supported("restart")?;
        self.ops.lock().push(("restart".to_string(), workflow_id.to_string()));
        let _ = name;
        self.set_status(workflow_id, WorkflowStatus::Queued);
        Ok(())
    }
}

/// An instance wired to scripted collaborators and a fake clock.
pub struct TestHarness {
    pub instance: Instance,
    pub agent: Arc<TestAgent>,
    pub runtime: Arc<TestWorkflowRuntime>,
    pub clock: FakeClock,
}

/// In-memory instance with default options.
pub fn harness() -> TestHarness {
    harness_with(TestAgent::new(), AgentOptions::default())
}

/// In-memory instance with the given agent and options.
pub fn harness_with(agent: Arc<TestAgent>, options: AgentOptions) -> TestHarness {
    let runtime = TestWorkflowRuntime::with_bindings(&["deploy", "backup"]);
    let clock = FakeClock::new();
    #[allow(clippy::expect_used)]
    let store = Store::open_in_memory().expect("in-memory store");
    #[allow(clippy::expect_used)]
    let instance = Instance::new(
        "test-instance",
        agent.clone(),
        runtime.clone(),
        store,
        options,
        clock.clone(),
    )
    .expect("instance");
    TestHarness { instance, agent, runtime, clock }
}
