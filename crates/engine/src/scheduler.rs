// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler: persisted future invocations and the single next-wake alarm.

use std::time::Duration;

use burrow_core::{RetryOptions, ScheduleId};
use burrow_storage::{ScheduleCriteria, ScheduleKind, ScheduleRow};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::agent::{Call, CallSource};
use crate::error::EngineError;
use crate::instance::{Instance, FIBER_HEARTBEAT, INTERNAL_PREFIX};

/// Longest allowed interval: 30 days.
const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// When a one-shot or cron schedule should run.
#[derive(Debug, Clone)]
pub enum ScheduleWhen {
    /// Absolute instant, unix seconds.
    At(u64),
    /// Relative delay in seconds from now.
    Delay(u64),
    /// Cron expression; the row re-arms to the next tick after each run.
    Cron(String),
}

/// Which durable row a retried callback belongs to.
pub(crate) enum RetrySource<'a> {
    Schedule(&'a ScheduleRow),
    Queue(&'a burrow_storage::QueueRow),
}

impl Instance {
    /// Persist a future invocation of `callback`.
    pub fn schedule(
        &self,
        when: ScheduleWhen,
        callback: &str,
        payload: Value,
        retry: Option<RetryOptions>,
    ) -> Result<ScheduleRow, EngineError> {
        self.guard_destroyed()?;
        self.check_callback_name(callback)?;
        let now = self.core.clock.epoch_secs();
        let (kind, time) = match when {
            ScheduleWhen::At(0) => {
                return Err(EngineError::InvalidSchedule("time must be positive".into()))
            }
            ScheduleWhen::At(t) => (ScheduleKind::Scheduled, t),
            ScheduleWhen::Delay(d) => (ScheduleKind::Delayed { delay_secs: d }, now + d),
            ScheduleWhen::Cron(expr) => {
                let first = next_cron_tick(&expr, now)?;
                (ScheduleKind::Cron { expr }, first)
            }
        };
        let row = ScheduleRow {
            id: ScheduleId::generate(),
            callback: callback.to_string(),
            payload,
            kind,
            time,
            running: false,
            execution_started_at: None,
            retry,
        };
        self.core.store.put_schedule(&row)?;
        self.rearm_alarm()?;
        Ok(row)
    }

    /// Persist a fixed-interval invocation. At most one execution per id is
    /// ever in flight; a tick that finds the previous one still running is
    /// skipped until the hang timeout force-resets it.
    pub fn schedule_every(
        &self,
        every_secs: u64,
        callback: &str,
        payload: Value,
        retry: Option<RetryOptions>,
    ) -> Result<ScheduleRow, EngineError> {
        self.guard_destroyed()?;
        self.check_callback_name(callback)?;
        self.schedule_interval_row(ScheduleId::generate(), every_secs, callback, payload, retry)
    }

    /// Interval insertion shared with engine-internal schedules (heartbeat),
    /// which use reserved ids and callbacks.
    pub(crate) fn schedule_interval_row(
        &self,
        id: ScheduleId,
        every_secs: u64,
        callback: &str,
        payload: Value,
        retry: Option<RetryOptions>,
    ) -> Result<ScheduleRow, EngineError> {
        if every_secs == 0 || every_secs > MAX_INTERVAL_SECS {
            return Err(EngineError::InvalidSchedule(format!(
                "interval must be between 1 second and 30 days, got {every_secs}s"
            )));
        }
        let now = self.core.clock.epoch_secs();
        let row = ScheduleRow {
            id,
            callback: callback.to_string(),
            payload,
            kind: ScheduleKind::Interval { every_secs },
            time: now + every_secs,
            running: false,
            execution_started_at: None,
            retry,
        };
        self.core.store.put_schedule(&row)?;
        self.rearm_alarm()?;
        Ok(row)
    }

    /// Delete a schedule and re-arm the alarm to the next remaining row.
    pub fn cancel_schedule(&self, id: &str) -> Result<bool, EngineError> {
        self.guard_destroyed()?;
        let removed = self.core.store.delete_schedule(id)?;
        self.rearm_alarm()?;
        Ok(removed)
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRow>, EngineError> {
        Ok(self.core.store.get_schedule(id)?)
    }

    pub fn get_schedules(
        &self,
        criteria: &ScheduleCriteria,
    ) -> Result<Vec<ScheduleRow>, EngineError> {
        Ok(self.core.store.list_schedules(criteria)?)
    }

    /// Alarm entry point: drain every due row in ascending due-time order,
    /// re-arm recurring rows, delete one-shots, then arm the next wake.
    ///
    /// Hang detection applies to intervals only; one-shot callbacks are
    /// never preempted.
    pub async fn on_alarm(&self) -> Result<(), EngineError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let now = self.core.clock.epoch_secs();
        let due = self.core.store.due_schedules(now)?;
        for row in due {
            if self.is_destroyed() {
                return Ok(());
            }
            self.run_due_schedule(row, now).await?;
        }
        self.rearm_alarm()?;
        Ok(())
    }

    async fn run_due_schedule(&self, row: ScheduleRow, now: u64) -> Result<(), EngineError> {
        if let ScheduleKind::Interval { .. } = row.kind {
            if row.running {
                let started = row.execution_started_at.unwrap_or(0);
                if now.saturating_sub(started) < self.core.options.hung_schedule_timeout_secs {
                    // Previous execution still in flight; skip this tick.
                    return Ok(());
                }
                tracing::warn!(
                    schedule_id = %row.id,
                    callback = %row.callback,
                    started_at = started,
                    "interval execution exceeded hang timeout, force-resetting"
                );
            }
            self.core.store.mark_schedule_running(row.id.as_str(), now)?;
        }

        let known = row.callback.starts_with(INTERNAL_PREFIX)
            || self.core.agent.has_method(&row.callback);
        if !known {
            self.warn_once(
                "schedule-missing-method",
                "a schedule names a method the agent does not implement",
            );
            tracing::warn!(schedule_id = %row.id, callback = %row.callback, "schedule names a missing method, skipping");
        } else {
            let retry = RetryOptions::resolve(row.retry, Some(self.core.options.retry));
            let result = self
                .run_callback_with_retry(
                    &row.callback,
                    &row.payload,
                    RetrySource::Schedule(&row),
                    retry,
                )
                .await;
            if let Err(e) = result {
                self.report_error(e).await;
            }
        }

        // Re-arm after the callback settles, success or not.
        match &row.kind {
            ScheduleKind::Cron { expr } => match next_cron_tick(expr, now) {
                Ok(next) => self.core.store.update_schedule_time(row.id.as_str(), next)?,
                Err(e) => {
                    tracing::error!(schedule_id = %row.id, error = %e, "cron row cannot re-arm, deleting");
                    self.core.store.delete_schedule(row.id.as_str())?;
                }
            },
            ScheduleKind::Interval { every_secs } => {
                self.core
                    .store
                    .finish_interval_schedule(row.id.as_str(), now + every_secs)?;
            }
            ScheduleKind::Scheduled | ScheduleKind::Delayed { .. } => {
                self.core.store.delete_schedule(row.id.as_str())?;
            }
        }
        Ok(())
    }

    /// Invoke a callback under the row's resolved retry policy: exponential
    /// backoff with jitter between attempts, terminal error after the last.
    pub(crate) async fn run_callback_with_retry(
        &self,
        callback: &str,
        payload: &Value,
        source: RetrySource<'_>,
        retry: RetryOptions,
    ) -> Result<Value, EngineError> {
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.invoke_callback(callback, payload, &source).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts {
                        return Err(EngineError::CallbackFailed {
                            callback: callback.to_string(),
                            attempts: attempt,
                            error,
                        });
                    }
                    let delay = retry.backoff_delay(attempt);
                    let source_label = match &source {
                        RetrySource::Schedule(_) => "schedule",
                        RetrySource::Queue(_) => "queue",
                    };
                    tracing::info!(
                        callback,
                        source = source_label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "callback failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn invoke_callback(
        &self,
        callback: &str,
        payload: &Value,
        source: &RetrySource<'_>,
    ) -> Result<Value, crate::error::HandlerError> {
        // Engine-internal callbacks never reach the agent's dispatch.
        if callback.starts_with(INTERNAL_PREFIX) {
            match callback {
                crate::instance::STATE_CHANGED_CALLBACK => {
                    self.run_state_changed_callback(payload).await;
                }
                FIBER_HEARTBEAT => {
                    self.heartbeat_tick()
                        .await
                        .map_err(|e| crate::error::HandlerError::new(e.to_string()))?;
                }
                other => {
                    tracing::warn!(callback = other, "unknown internal callback, ignoring");
                }
            }
            return Ok(Value::Null);
        }
        let call_source = match source {
            RetrySource::Schedule(row) => CallSource::Schedule { row },
            RetrySource::Queue(row) => CallSource::Queue { row },
        };
        self.core
            .agent
            .call(
                self,
                Call { method: callback, payload: payload.clone(), source: call_source },
            )
            .await
    }

    /// Mirror the earliest due time from the schedule table into the alarm
    /// deadline and wake the alarm loop to re-evaluate.
    pub(crate) fn rearm_alarm(&self) -> Result<(), EngineError> {
        let next = if self.is_destroyed() {
            None
        } else {
            self.core.store.next_schedule_time()?
        };
        *self.core.alarm_deadline.lock() = next;
        // notify_one stores a permit, so a deadline change between the
        // loop's deadline read and its await is never lost.
        self.core.alarm_notify.notify_one();
        Ok(())
    }

    /// Next wake time in unix seconds, if any schedule is pending.
    pub fn next_wake(&self) -> Option<u64> {
        *self.core.alarm_deadline.lock()
    }

    /// Host-driven alarm loop: sleep until the deadline (or until a schedule
    /// mutation moves it), fire `on_alarm`, repeat. Exits on destroy.
    pub async fn run_alarm(&self) {
        loop {
            if self.is_destroyed() {
                return;
            }
            match self.next_wake() {
                None => self.core.alarm_notify.notified().await,
                Some(deadline) => {
                    let now_ms = self.core.clock.epoch_ms();
                    let target_ms = deadline.saturating_mul(1000);
                    if target_ms > now_ms {
                        let sleep = tokio::time::sleep(Duration::from_millis(target_ms - now_ms));
                        tokio::pin!(sleep);
                        tokio::select! {
                            _ = self.core.alarm_notify.notified() => continue,
                            _ = &mut sleep => {}
                        }
                    }
                    if let Err(e) = self.on_alarm().await {
                        self.report_error(e).await;
                    }
                    // A skipped in-flight interval leaves its due time in the
                    // past; poll instead of spinning until the hang timeout
                    // resolves it.
                    if self
                        .next_wake()
                        .is_some_and(|t| t.saturating_mul(1000) <= self.core.clock.epoch_ms())
                    {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Next cron tick strictly after `after_secs`, unix seconds.
fn next_cron_tick(expr: &str, after_secs: u64) -> Result<u64, EngineError> {
    let cron: croner::Cron = expr
        .parse()
        .map_err(|e| EngineError::InvalidSchedule(format!("invalid cron '{expr}': {e}")))?;
    let after: DateTime<Utc> = DateTime::from_timestamp(after_secs as i64, 0)
        .ok_or_else(|| EngineError::InvalidSchedule(format!("time {after_secs} out of range")))?;
    let next = cron
        .find_next_occurrence(&after, false)
        .map_err(|e| EngineError::InvalidSchedule(format!("cron '{expr}' has no next tick: {e}")))?;
    Ok(next.timestamp() as u64)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
