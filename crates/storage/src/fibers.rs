// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fiber table: durable long-running tasks with snapshot-based resume.

use burrow_core::FiberId;
use rusqlite::{params, Row};
use serde_json::Value;

use crate::store::{Store, StoreError};

/// Lifecycle state of a fiber.
///
/// `Running` with no in-process executor means the fiber was interrupted by
/// an eviction; the recovery sweep is what notices that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    Running,
    Completed,
    Failed,
    Interrupted,
    Cancelled,
}

impl FiberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiberStatus::Running => "running",
            FiberStatus::Completed => "completed",
            FiberStatus::Failed => "failed",
            FiberStatus::Interrupted => "interrupted",
            FiberStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(FiberStatus::Running),
            "completed" => Some(FiberStatus::Completed),
            "failed" => Some(FiberStatus::Failed),
            "interrupted" => Some(FiberStatus::Interrupted),
            "cancelled" => Some(FiberStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again (cancellation is cooperative,
    /// so `Cancelled` is terminal once observed by the run loop).
    pub fn is_terminal(&self) -> bool {
        matches!(self, FiberStatus::Completed | FiberStatus::Failed | FiberStatus::Cancelled)
    }
}

/// A persisted fiber row.
#[derive(Debug, Clone)]
pub struct FiberRow {
    pub id: FiberId,
    pub callback: String,
    pub payload: Value,
    /// Latest checkpoint stashed by the running method. Only consulted on
    /// recovery, never on the happy path.
    pub snapshot: Option<Value>,
    pub status: FiberStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

fn row_to_fiber(row: &Row<'_>) -> Result<FiberRow, StoreError> {
    let id: String = row.get("id")?;
    let status_str: String = row.get("status")?;
    let status = FiberStatus::parse(&status_str).ok_or_else(|| StoreError::CorruptRow {
        table: "cf_agents_fibers",
        id: id.clone(),
        detail: format!("unknown fiber status {status_str:?}"),
    })?;
    let parse_opt = |text: Option<String>| -> Result<Option<Value>, StoreError> {
        Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
    };
    let payload = match row.get::<_, Option<String>>("payload")? {
        Some(text) => serde_json::from_str(&text)?,
        None => Value::Null,
    };
    Ok(FiberRow {
        id: FiberId::new(id),
        callback: row.get("callback")?,
        payload,
        snapshot: parse_opt(row.get("snapshot")?)?,
        status,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        result: parse_opt(row.get("result")?)?,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

const SELECT_COLS: &str = "id, callback, payload, snapshot, status, retry_count, max_retries, \
     result, error, created_at, started_at, completed_at";

impl Store {
    pub fn put_fiber(&self, fiber: &FiberRow) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&fiber.payload)?;
        let snapshot = fiber.snapshot.as_ref().map(serde_json::to_string).transpose()?;
        let result = fiber.result.as_ref().map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cf_agents_fibers \
                 (id, callback, payload, snapshot, status, retry_count, max_retries, \
                  result, error, created_at, started_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    fiber.id.as_str(),
                    fiber.callback,
                    payload,
                    snapshot,
                    fiber.status.as_str(),
                    fiber.retry_count,
                    fiber.max_retries,
                    result,
                    fiber.error,
                    fiber.created_at,
                    fiber.started_at,
                    fiber.completed_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_fiber(&self, id: &str) -> Result<Option<FiberRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM cf_agents_fibers WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_fiber(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_fibers(&self) -> Result<Vec<FiberRow>, StoreError> {
        self.fiber_query(
            &format!("SELECT {SELECT_COLS} FROM cf_agents_fibers ORDER BY created_at ASC, id ASC"),
            [],
        )
    }

    pub fn fibers_with_status(&self, status: FiberStatus) -> Result<Vec<FiberRow>, StoreError> {
        self.fiber_query(
            &format!(
                "SELECT {SELECT_COLS} FROM cf_agents_fibers \
                 WHERE status = ?1 ORDER BY created_at ASC, id ASC"
            ),
            params![status.as_str()],
        )
    }

    /// Overwrite a running fiber's checkpoint.
    pub fn put_fiber_snapshot(&self, id: &str, snapshot: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(snapshot)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cf_agents_fibers SET snapshot = ?2 WHERE id = ?1",
                params![id, text],
            )?;
            Ok(())
        })
    }

    pub fn delete_fiber(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM cf_agents_fibers WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    /// Retention pass: completed and cancelled rows older than a day, failed
    /// rows older than a week. Ages are compared against `completed_at`
    /// (falling back to `created_at` for rows that never finished cleanly).
    pub fn cleanup_fibers(&self, now_ms: u64) -> Result<usize, StoreError> {
        const DAY_MS: u64 = 24 * 60 * 60 * 1000;
        const WEEK_MS: u64 = 7 * DAY_MS;
        let day_cutoff = now_ms.saturating_sub(DAY_MS);
        let week_cutoff = now_ms.saturating_sub(WEEK_MS);
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM cf_agents_fibers \
                 WHERE (status IN ('completed', 'cancelled') \
                        AND COALESCE(completed_at, created_at) < ?1) \
                    OR (status = 'failed' AND COALESCE(completed_at, created_at) < ?2)",
                params![day_cutoff, week_cutoff],
            )?;
            Ok(n)
        })
    }

    fn fiber_query(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<FiberRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(args)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_fiber(row)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
#[path = "fibers_tests.rs"]
mod tests;
