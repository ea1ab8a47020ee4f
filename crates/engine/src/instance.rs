// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The instance: a named actor owning its store, connections, fibers, and
//! the single next-wake alarm.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use burrow_core::{Clock, ConnectionId, FiberId};
use burrow_storage::Store;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::connection::ConnectionEntry;
use crate::error::EngineError;
use crate::options::AgentOptions;
use crate::workflow::WorkflowRuntime;

/// Reserved prefix for engine-internal callback names.
pub(crate) const INTERNAL_PREFIX: &str = "__";
/// Deferred post-persist state notification (queue callback).
pub(crate) const STATE_CHANGED_CALLBACK: &str = "__state_changed";
/// Fiber heartbeat (interval schedule id and callback).
pub(crate) const FIBER_HEARTBEAT: &str = "__fiber_heartbeat";

/// Object-safe view of a [`Clock`] so the instance is not generic over it.
pub(crate) trait SharedClock: Send + Sync {
    fn epoch_ms(&self) -> u64;
    fn epoch_secs(&self) -> u64;
}

impl<C: Clock> SharedClock for C {
    fn epoch_ms(&self) -> u64 {
        Clock::epoch_ms(self)
    }
    fn epoch_secs(&self) -> u64 {
        Clock::epoch_secs(self)
    }
}

/// Shared interior of an instance. Everything mutable sits behind a lock
/// that is released before any await.
pub(crate) struct Core {
    pub(crate) name: String,
    pub(crate) agent: Arc<dyn Agent>,
    pub(crate) runtime: Arc<dyn WorkflowRuntime>,
    pub(crate) store: Store,
    pub(crate) options: AgentOptions,
    pub(crate) clock: Arc<dyn SharedClock>,

    pub(crate) connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    /// Fibers with an executor in this process. A `running` row whose id is
    /// missing here was interrupted by an eviction.
    pub(crate) active_fibers: Mutex<HashSet<FiberId>>,
    pub(crate) fiber_tasks: Mutex<HashMap<FiberId, JoinHandle<()>>>,
    pub(crate) queue_draining: AtomicBool,
    pub(crate) fiber_recovery_in_progress: AtomicBool,
    pub(crate) destroyed: AtomicBool,
    /// Epoch-ms of the last fiber retention pass.
    pub(crate) last_fiber_cleanup_ms: Mutex<u64>,
    /// Next alarm deadline in unix seconds, mirrored from the schedule table.
    pub(crate) alarm_deadline: Mutex<Option<u64>>,
    pub(crate) alarm_notify: Notify,
    /// Opaque MCP subsystem snapshot sent on connect.
    pub(crate) mcp: Mutex<Value>,
}

/// Handle to a running instance. Cloning is cheap; all clones address the
/// same actor. Hooks receive this same type as [`Context`], so agent code
/// can drive every engine operation re-entrantly.
#[derive(Clone)]
pub struct Instance {
    pub(crate) core: Arc<Core>,
}

/// The view of the instance handed to agent hooks and dispatched methods.
pub type Context = Instance;

impl Instance {
    /// Create an instance bound to `store`.
    ///
    /// Any pending schedules in the store immediately arm the alarm, so a
    /// rehydrated instance resumes where the evicted one left off.
    pub fn new(
        name: impl Into<String>,
        agent: Arc<dyn Agent>,
        runtime: Arc<dyn WorkflowRuntime>,
        store: Store,
        options: AgentOptions,
        clock: impl Clock,
    ) -> Result<Self, EngineError> {
        let instance = Self {
            core: Arc::new(Core {
                name: name.into(),
                agent,
                runtime,
                store,
                options,
                clock: Arc::new(clock),
                connections: Mutex::new(HashMap::new()),
                active_fibers: Mutex::new(HashSet::new()),
                fiber_tasks: Mutex::new(HashMap::new()),
                queue_draining: AtomicBool::new(false),
                fiber_recovery_in_progress: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                last_fiber_cleanup_ms: Mutex::new(0),
                alarm_deadline: Mutex::new(None),
                alarm_notify: Notify::new(),
                mcp: Mutex::new(json!({
                    "servers": {},
                    "tools": [],
                    "prompts": [],
                    "resources": [],
                })),
            }),
        };
        instance.rearm_alarm()?;
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Direct access to the instance's embedded store. The instance is the
    /// single writer; hosts use this for admin reads and test setup only.
    pub fn store(&self) -> &Store {
        &self.core.store
    }

    /// The class options this instance was created with. Hosts consult
    /// `options().hibernate` when deciding whether to passivate between
    /// events.
    pub fn options(&self) -> &AgentOptions {
        &self.core.options
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed.load(Ordering::SeqCst)
    }

    /// Replace the MCP snapshot broadcast to newly attached connections.
    pub fn set_mcp_snapshot(&self, mcp: Value) {
        *self.core.mcp.lock() = mcp;
    }

    pub fn mcp_snapshot(&self) -> Value {
        self.core.mcp.lock().clone()
    }

    /// Tear the instance down: drop all five tables, clear the alarm, abort
    /// fiber tasks, and mark the instance unusable. Every subsequent alarm
    /// or drain entry point short-circuits.
    pub fn destroy(&self) -> Result<(), EngineError> {
        self.core.destroyed.store(true, Ordering::SeqCst);
        for (_, task) in self.core.fiber_tasks.lock().drain() {
            task.abort();
        }
        self.core.active_fibers.lock().clear();
        self.core.connections.lock().clear();
        *self.core.alarm_deadline.lock() = None;
        self.core.alarm_notify.notify_one();
        self.core.store.drop_all()?;
        tracing::info!(instance = %self.core.name, "instance destroyed");
        Ok(())
    }

    /// Route a terminal error through the agent's `on_error` hook.
    pub(crate) async fn report_error(&self, error: EngineError) {
        self.core.agent.on_error(&error).await;
    }

    pub(crate) fn guard_destroyed(&self) -> Result<(), EngineError> {
        if self.is_destroyed() {
            Err(EngineError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Reject reserved (engine-internal) callback names at the public API.
    pub(crate) fn check_callback_name(&self, callback: &str) -> Result<(), EngineError> {
        if callback.is_empty() || callback.starts_with(INTERNAL_PREFIX) {
            return Err(EngineError::ReservedCallback(callback.to_string()));
        }
        Ok(())
    }

    /// Log a structural warning once per process per key.
    pub(crate) fn warn_once(&self, key: &'static str, message: &str) {
        static WARNED: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
        let warned = WARNED.get_or_init(|| Mutex::new(HashSet::new()));
        if warned.lock().insert(key) {
            tracing::warn!("{message}");
        }
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
