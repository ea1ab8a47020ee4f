// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule table: persisted future invocations, four kinds.

use burrow_core::{RetryOptions, ScheduleId};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::store::{Store, StoreError};

/// What flavor of schedule a row is.
///
/// The kind decides which of the type-specific columns are populated and how
/// the row is re-armed after it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleKind {
    /// One-shot at an absolute instant.
    Scheduled,
    /// One-shot, `delay_secs` after creation.
    Delayed { delay_secs: u64 },
    /// Recurring on a cron expression.
    Cron { expr: String },
    /// Recurring every `every_secs`, with no-overlap enforcement.
    Interval { every_secs: u64 },
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Scheduled => "scheduled",
            ScheduleKind::Delayed { .. } => "delayed",
            ScheduleKind::Cron { .. } => "cron",
            ScheduleKind::Interval { .. } => "interval",
        }
    }

    /// Recurring kinds are re-armed after each run instead of deleted.
    pub fn is_recurring(&self) -> bool {
        matches!(self, ScheduleKind::Cron { .. } | ScheduleKind::Interval { .. })
    }
}

/// A persisted schedule row.
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub id: ScheduleId,
    pub callback: String,
    pub payload: Value,
    pub kind: ScheduleKind,
    /// Next due time, unix seconds. Always > 0.
    pub time: u64,
    /// Interval rows only: an execution is currently in flight.
    pub running: bool,
    /// Interval rows only: when the in-flight execution started, unix seconds.
    pub execution_started_at: Option<u64>,
    pub retry: Option<RetryOptions>,
}

/// Filters for [`Store::list_schedules`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleCriteria {
    pub kind: Option<&'static str>,
    pub id_prefix: Option<String>,
    /// Only rows due at or after this unix-seconds bound.
    pub time_min: Option<u64>,
    /// Only rows due at or before this unix-seconds bound.
    pub time_max: Option<u64>,
}

fn row_to_schedule(row: &Row<'_>) -> Result<ScheduleRow, StoreError> {
    let id: String = row.get("id")?;
    let kind_str: String = row.get("type")?;
    let kind = match kind_str.as_str() {
        "scheduled" => ScheduleKind::Scheduled,
        "delayed" => ScheduleKind::Delayed {
            delay_secs: row.get::<_, Option<u64>>("delay_in_seconds")?.unwrap_or(0),
        },
        "cron" => ScheduleKind::Cron {
            expr: row.get::<_, Option<String>>("cron")?.unwrap_or_default(),
        },
        "interval" => ScheduleKind::Interval {
            every_secs: row.get::<_, Option<u64>>("interval_seconds")?.unwrap_or(0),
        },
        other => {
            return Err(StoreError::CorruptRow {
                table: "cf_agents_schedules",
                id,
                detail: format!("unknown schedule type {other:?}"),
            })
        }
    };
    let payload = match row.get::<_, Option<String>>("payload")? {
        Some(text) => serde_json::from_str(&text)?,
        None => Value::Null,
    };
    let retry = row
        .get::<_, Option<String>>("retry_options")?
        .map(|text| serde_json::from_str(&text))
        .transpose()?;
    Ok(ScheduleRow {
        id: ScheduleId::new(id),
        callback: row.get("callback")?,
        payload,
        kind,
        time: row.get("time")?,
        running: row.get::<_, i64>("running")? != 0,
        execution_started_at: row.get("execution_started_at")?,
        retry,
    })
}

const SELECT_COLS: &str = "id, callback, payload, type, time, delay_in_seconds, cron, \
     interval_seconds, running, execution_started_at, retry_options";

impl Store {
    /// Insert or replace a schedule row.
    pub fn put_schedule(&self, row: &ScheduleRow) -> Result<(), StoreError> {
        let (delay, cron, every) = match &row.kind {
            ScheduleKind::Scheduled => (None, None, None),
            ScheduleKind::Delayed { delay_secs } => (Some(*delay_secs), None, None),
            ScheduleKind::Cron { expr } => (None, Some(expr.clone()), None),
            ScheduleKind::Interval { every_secs } => (None, None, Some(*every_secs)),
        };
        let payload = serde_json::to_string(&row.payload)?;
        let retry = row.retry.map(|r| serde_json::to_string(&r)).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cf_agents_schedules \
                 (id, callback, payload, type, time, delay_in_seconds, cron, \
                  interval_seconds, running, execution_started_at, retry_options) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id.as_str(),
                    row.callback,
                    payload,
                    row.kind.as_str(),
                    row.time,
                    delay,
                    cron,
                    every,
                    row.running as i64,
                    row.execution_started_at,
                    retry,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM cf_agents_schedules WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_schedule(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Delete a schedule row. Returns whether a row existed.
    pub fn delete_schedule(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM cf_agents_schedules WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    /// All rows due at or before `now`, ascending by due time.
    pub fn due_schedules(&self, now: u64) -> Result<Vec<ScheduleRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM cf_agents_schedules \
                 WHERE time <= ?1 ORDER BY time ASC, id ASC"
            ))?;
            let mut rows = stmt.query(params![now])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_schedule(row)?);
            }
            Ok(out)
        })
    }

    /// Earliest due time across all rows, if any. The alarm is armed to
    /// `max(now, next_schedule_time)`.
    pub fn next_schedule_time(&self) -> Result<Option<u64>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT MIN(time) FROM cf_agents_schedules", [], |row| {
                    row.get::<_, Option<u64>>(0)
                })
                .optional()?
                .flatten())
        })
    }

    /// Stamp an interval row as executing.
    pub fn mark_schedule_running(&self, id: &str, started_at: u64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cf_agents_schedules \
                 SET running = 1, execution_started_at = ?2 WHERE id = ?1",
                params![id, started_at],
            )?;
            Ok(())
        })
    }

    /// Clear the running flag and re-arm an interval row.
    pub fn finish_interval_schedule(&self, id: &str, next_time: u64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cf_agents_schedules \
                 SET running = 0, execution_started_at = NULL, time = ?2 WHERE id = ?1",
                params![id, next_time],
            )?;
            Ok(())
        })
    }

    /// Re-arm a cron row to its next tick.
    pub fn update_schedule_time(&self, id: &str, next_time: u64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cf_agents_schedules SET time = ?2 WHERE id = ?1",
                params![id, next_time],
            )?;
            Ok(())
        })
    }

    /// Query schedules with optional filters, ascending by due time.
    pub fn list_schedules(&self, criteria: &ScheduleCriteria) -> Result<Vec<ScheduleRow>, StoreError> {
        let mut sql = format!("SELECT {SELECT_COLS} FROM cf_agents_schedules WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(kind) = criteria.kind {
            sql.push_str(" AND type = ?");
            args.push(Box::new(kind.to_string()));
        }
        if let Some(prefix) = &criteria.id_prefix {
            sql.push_str(" AND id LIKE ? || '%'");
            args.push(Box::new(prefix.clone()));
        }
        if let Some(min) = criteria.time_min {
            sql.push_str(" AND time >= ?");
            args.push(Box::new(min));
        }
        if let Some(max) = criteria.time_max {
            sql.push_str(" AND time <= ?");
            args.push(Box::new(max));
        }
        sql.push_str(" ORDER BY time ASC, id ASC");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_schedule(row)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
#[path = "schedules_tests.rs"]
mod tests;
