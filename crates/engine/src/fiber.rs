// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fiber engine: durable long-running tasks that survive process eviction.
//!
//! Execution runs as an in-process task; durability comes from the row. A
//! heartbeat interval keeps the instance waking up, and each heartbeat runs
//! the recovery sweep: any `running` row with no in-process executor was
//! interrupted by an eviction and is retried or failed.

use std::sync::atomic::Ordering;

use burrow_core::{FiberId, ScheduleId};
use burrow_storage::{FiberRow, FiberStatus};
use serde_json::Value;

use crate::agent::{Call, CallSource};
use crate::error::EngineError;
use crate::instance::{Instance, FIBER_HEARTBEAT};

/// Heartbeat cadence; also the pace of eviction recovery.
const HEARTBEAT_EVERY_SECS: u64 = 10;
/// Minimum gap between fiber retention passes.
const CLEANUP_EVERY_MS: u64 = 10 * 60 * 1000;
/// Default in-process and recovery retry budget.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Options for [`Instance::spawn_fiber`].
#[derive(Debug, Clone, Default)]
pub struct SpawnFiberOptions {
    pub max_retries: Option<u32>,
}

/// Handle given to a running fiber method.
///
/// `stash` persists an opaque checkpoint; it is only ever read back on
/// recovery, so methods checkpoint at whatever granularity makes resume
/// cheap. Cancellation is cooperative: long loops should poll
/// `is_cancelled` and return.
pub struct FiberHandle {
    instance: Instance,
    id: FiberId,
    resume_snapshot: Option<Value>,
}

impl FiberHandle {
    pub fn id(&self) -> &FiberId {
        &self.id
    }

    /// The checkpoint persisted by a previous execution, if any. `None` on
    /// a first run.
    pub fn resume_snapshot(&self) -> Option<&Value> {
        self.resume_snapshot.as_ref()
    }

    /// Persist a progress checkpoint, overwriting the previous one.
    pub fn stash(&self, snapshot: Value) -> Result<(), EngineError> {
        Ok(self
            .instance
            .core
            .store
            .put_fiber_snapshot(self.id.as_str(), &snapshot)?)
    }

    /// Whether this fiber has been cancelled.
    pub fn is_cancelled(&self) -> Result<bool, EngineError> {
        Ok(self
            .instance
            .core
            .store
            .get_fiber(self.id.as_str())?
            .map(|row| row.status == FiberStatus::Cancelled)
            .unwrap_or(true))
    }
}

impl Instance {
    /// Start a durable fiber executing `callback` in the background.
    pub fn spawn_fiber(
        &self,
        callback: &str,
        payload: Value,
        opts: SpawnFiberOptions,
    ) -> Result<FiberRow, EngineError> {
        self.guard_destroyed()?;
        self.check_callback_name(callback)?;
        let now_ms = self.core.clock.epoch_ms();
        let row = FiberRow {
            id: FiberId::generate(),
            callback: callback.to_string(),
            payload,
            snapshot: None,
            status: FiberStatus::Running,
            retry_count: 0,
            max_retries: opts.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            result: None,
            error: None,
            created_at: now_ms,
            started_at: Some(now_ms),
            completed_at: None,
        };
        self.core.store.put_fiber(&row)?;
        self.ensure_heartbeat()?;
        self.launch_fiber(row.id.clone());
        Ok(row)
    }

    /// Flip an interrupted (or otherwise non-terminal) fiber back to running
    /// and relaunch its method with the persisted snapshot. This is the
    /// default recovery action.
    pub async fn restart_fiber(&self, id: &str) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        let mut row = self
            .core
            .store
            .get_fiber(id)?
            .ok_or_else(|| EngineError::UnknownFiber(id.to_string()))?;
        row.status = FiberStatus::Running;
        row.started_at = Some(self.core.clock.epoch_ms());
        self.core.store.put_fiber(&row)?;
        self.ensure_heartbeat()?;
        self.launch_fiber(row.id);
        Ok(())
    }

    /// Request cooperative cancellation. Returns false when the fiber is
    /// already terminal (or unknown); in-flight work is not interrupted and
    /// observes the cancellation at its next loop iteration.
    pub fn cancel_fiber(&self, id: &str) -> Result<bool, EngineError> {
        self.guard_destroyed()?;
        let Some(mut row) = self.core.store.get_fiber(id)? else {
            return Ok(false);
        };
        if row.status.is_terminal() {
            return Ok(false);
        }
        row.status = FiberStatus::Cancelled;
        row.completed_at = Some(self.core.clock.epoch_ms());
        self.core.store.put_fiber(&row)?;
        Ok(true)
    }

    pub fn get_fiber(&self, id: &str) -> Result<Option<FiberRow>, EngineError> {
        Ok(self.core.store.get_fiber(id)?)
    }

    pub fn list_fibers(&self) -> Result<Vec<FiberRow>, EngineError> {
        Ok(self.core.store.list_fibers()?)
    }

    /// Run the interrupted-fiber sweep now instead of waiting for the next
    /// heartbeat. Hosts call this once after rehydrating an instance.
    pub async fn check_fibers(&self) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        self.check_interrupted_fibers().await
    }

    /// One heartbeat: recovery sweep, then a throttled retention pass.
    pub(crate) async fn heartbeat_tick(&self) -> Result<(), EngineError> {
        self.check_interrupted_fibers().await?;
        let now_ms = self.core.clock.epoch_ms();
        let run_cleanup = {
            let mut last = self.core.last_fiber_cleanup_ms.lock();
            if now_ms.saturating_sub(*last) >= CLEANUP_EVERY_MS {
                *last = now_ms;
                true
            } else {
                false
            }
        };
        if run_cleanup {
            let removed = self.core.store.cleanup_fibers(now_ms)?;
            if removed > 0 {
                tracing::debug!(removed, "pruned terminal fibers");
            }
        }
        Ok(())
    }

    /// Recovery sweep, reentrance-guarded.
    async fn check_interrupted_fibers(&self) -> Result<(), EngineError> {
        if self.core.fiber_recovery_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.sweep_interrupted().await;
        self.core.fiber_recovery_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn sweep_interrupted(&self) -> Result<(), EngineError> {
        let now_ms = self.core.clock.epoch_ms();
        let running = self.core.store.fibers_with_status(FiberStatus::Running)?;
        let active = self.core.active_fibers.lock().clone();

        let mut batch = Vec::new();
        for mut row in running {
            if active.contains(&row.id) {
                continue;
            }
            // Running row with no in-process executor: interrupted.
            row.retry_count += 1;
            if row.retry_count > row.max_retries {
                row.status = FiberStatus::Failed;
                row.error = Some("max retries exceeded (eviction recovery)".to_string());
                row.completed_at = Some(now_ms);
                self.core.store.put_fiber(&row)?;
                tracing::warn!(fiber_id = %row.id, callback = %row.callback, "interrupted fiber out of retries");
            } else {
                row.status = FiberStatus::Interrupted;
                self.core.store.put_fiber(&row)?;
                batch.push(row);
            }
        }

        // Heartbeats from an evicted process are orphans; drop them so the
        // recovery path installs a fresh one.
        if active.is_empty() && self.core.store.delete_schedule(FIBER_HEARTBEAT)? {
            self.rearm_alarm()?;
        }

        if !batch.is_empty() {
            tracing::info!(count = batch.len(), "recovering interrupted fibers");
            self.core.agent.on_fibers_recovered(self, batch).await;
        }
        Ok(())
    }

    /// Install the heartbeat interval if it is not already scheduled.
    pub(crate) fn ensure_heartbeat(&self) -> Result<(), EngineError> {
        if self.core.store.get_schedule(FIBER_HEARTBEAT)?.is_none() {
            self.schedule_interval_row(
                ScheduleId::new(FIBER_HEARTBEAT),
                HEARTBEAT_EVERY_SECS,
                FIBER_HEARTBEAT,
                Value::Null,
                None,
            )?;
        }
        Ok(())
    }

    /// Drop the heartbeat once nothing is left for it to watch.
    fn release_heartbeat_if_idle(&self) -> Result<(), EngineError> {
        if !self.core.active_fibers.lock().is_empty() {
            return Ok(());
        }
        let watching = !self.core.store.fibers_with_status(FiberStatus::Running)?.is_empty()
            || !self.core.store.fibers_with_status(FiberStatus::Interrupted)?.is_empty();
        if !watching && self.core.store.delete_schedule(FIBER_HEARTBEAT)? {
            self.rearm_alarm()?;
        }
        Ok(())
    }

    /// Spawn the in-process executor for a fiber. At most one executor per
    /// fiber id: losing the active-set race means one is already running.
    fn launch_fiber(&self, id: FiberId) {
        if !self.core.active_fibers.lock().insert(id.clone()) {
            return;
        }
        let instance = self.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            run_fiber(&instance, &task_id).await;
            instance.core.active_fibers.lock().remove(&task_id);
            instance.core.fiber_tasks.lock().remove(&task_id);
            if let Err(e) = instance.release_heartbeat_if_idle() {
                instance.report_error(e).await;
            }
        });
        self.core.fiber_tasks.lock().insert(id, task);
    }
}

/// The fiber run loop: invoke the method, handle completion, in-process
/// retries (no backoff; recovery-driven retries are paced by the heartbeat),
/// and cooperative cancellation observed between iterations.
async fn run_fiber(instance: &Instance, id: &FiberId) {
    loop {
        if instance.is_destroyed() {
            return;
        }
        let row = match instance.core.store.get_fiber(id.as_str()) {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(e) => {
                instance.report_error(e.into()).await;
                return;
            }
        };
        if row.status != FiberStatus::Running {
            return;
        }

        let handle = FiberHandle {
            instance: instance.clone(),
            id: id.clone(),
            resume_snapshot: row.snapshot.clone(),
        };
        let call = Call {
            method: &row.callback,
            payload: row.payload.clone(),
            source: CallSource::Fiber { fiber: &handle },
        };
        let result = instance.core.agent.call(instance, call).await;
        let now_ms = instance.core.clock.epoch_ms();

        // Re-read: the method may have stashed snapshots, and a cancel may
        // have landed while it ran.
        let mut current = match instance.core.store.get_fiber(id.as_str()) {
            Ok(Some(row)) => row,
            _ => return,
        };

        match result {
            Ok(value) => {
                if current.status != FiberStatus::Running {
                    // Cancelled mid-flight; terminal status wins.
                    return;
                }
                current.status = FiberStatus::Completed;
                current.result = Some(value);
                current.completed_at = Some(now_ms);
                if let Err(e) = instance.core.store.put_fiber(&current) {
                    instance.report_error(e.into()).await;
                    return;
                }
                instance.core.agent.on_fiber_complete(instance, &current).await;
                return;
            }
            Err(error) => {
                if current.status != FiberStatus::Running {
                    return;
                }
                current.retry_count += 1;
                if current.retry_count <= current.max_retries {
                    if let Err(e) = instance.core.store.put_fiber(&current) {
                        instance.report_error(e.into()).await;
                        return;
                    }
                    tracing::info!(
                        fiber_id = %current.id,
                        callback = %current.callback,
                        retry_count = current.retry_count,
                        error = %error,
                        "fiber failed, retrying with latest snapshot"
                    );
                    continue;
                }
                current.status = FiberStatus::Failed;
                current.error = Some(error.to_string());
                current.completed_at = Some(now_ms);
                if let Err(e) = instance.core.store.put_fiber(&current) {
                    instance.report_error(e.into()).await;
                    return;
                }
                instance
                    .report_error(EngineError::CallbackFailed {
                        callback: current.callback.clone(),
                        attempts: current.retry_count,
                        error,
                    })
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "fiber_tests.rs"]
mod tests;
