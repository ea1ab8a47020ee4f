// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow table: local mirror of externally-executed workflow lifecycles,
//! with keyset pagination.

use rusqlite::{params, Row};
use serde_json::Value;

use crate::store::{Store, StoreError};

/// Mirrored status of an external workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Queued,
    Running,
    Paused,
    Errored,
    Terminated,
    Complete,
    Waiting,
    WaitingForPause,
    Unknown,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Queued => "queued",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Errored => "errored",
            WorkflowStatus::Terminated => "terminated",
            WorkflowStatus::Complete => "complete",
            WorkflowStatus::Waiting => "waiting",
            WorkflowStatus::WaitingForPause => "waitingForPause",
            WorkflowStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(WorkflowStatus::Queued),
            "running" => Some(WorkflowStatus::Running),
            "paused" => Some(WorkflowStatus::Paused),
            "errored" => Some(WorkflowStatus::Errored),
            "terminated" => Some(WorkflowStatus::Terminated),
            "complete" => Some(WorkflowStatus::Complete),
            "waiting" => Some(WorkflowStatus::Waiting),
            "waitingForPause" => Some(WorkflowStatus::WaitingForPause),
            "unknown" => Some(WorkflowStatus::Unknown),
            _ => None,
        }
    }
}

/// A tracked workflow row.
#[derive(Debug, Clone)]
pub struct WorkflowRow {
    /// Local row id.
    pub id: String,
    /// External workflow instance id (unique).
    pub workflow_id: String,
    /// Name of the workflow binding that launched it.
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub metadata: Option<Value>,
    pub error_name: Option<String>,
    pub error_message: Option<String>,
    /// Unix milliseconds; pagination cursor component.
    pub created_at: u64,
    pub updated_at: u64,
}

/// Sort direction for workflow listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filters and paging for [`Store::list_workflows`] / [`Store::delete_workflows`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowCriteria {
    pub workflow_name: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page.
    pub cursor: Option<String>,
    pub order: SortOrder,
}

/// One page of workflow rows plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct WorkflowPage {
    pub rows: Vec<WorkflowRow>,
    pub next_cursor: Option<String>,
}

/// Cursor encodes the keyset `(created_at, workflow_id)` of the last row.
fn encode_cursor(row: &WorkflowRow) -> String {
    format!("{}:{}", row.created_at, row.workflow_id)
}

fn decode_cursor(cursor: &str) -> Option<(u64, String)> {
    let (ts, id) = cursor.split_once(':')?;
    Some((ts.parse().ok()?, id.to_string()))
}

fn row_to_workflow(row: &Row<'_>) -> Result<WorkflowRow, StoreError> {
    let id: String = row.get("id")?;
    let status_str: String = row.get("status")?;
    let status = WorkflowStatus::parse(&status_str).ok_or_else(|| StoreError::CorruptRow {
        table: "cf_agents_workflows",
        id: id.clone(),
        detail: format!("unknown workflow status {status_str:?}"),
    })?;
    let metadata = row
        .get::<_, Option<String>>("metadata")?
        .map(|text| serde_json::from_str(&text))
        .transpose()?;
    Ok(WorkflowRow {
        id,
        workflow_id: row.get("workflow_id")?,
        workflow_name: row.get("workflow_name")?,
        status,
        metadata,
        error_name: row.get("error_name")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT_COLS: &str = "id, workflow_id, workflow_name, status, metadata, error_name, \
     error_message, created_at, updated_at";

impl Store {
    /// Insert a new tracking row. A duplicate external id is a named error.
    pub fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), StoreError> {
        let metadata = row.metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO cf_agents_workflows \
                 (id, workflow_id, workflow_name, status, metadata, error_name, \
                  error_message, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id,
                    row.workflow_id,
                    row.workflow_name,
                    row.status.as_str(),
                    metadata,
                    row.error_name,
                    row.error_message,
                    row.created_at,
                    row.updated_at,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, msg))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    let _ = msg;
                    Err(StoreError::DuplicateWorkflow(row.workflow_id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM cf_agents_workflows WHERE workflow_id = ?1"
            ))?;
            let mut rows = stmt.query(params![workflow_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_workflow(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Update status and error fields, bumping `updated_at`.
    pub fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error_name: Option<&str>,
        error_message: Option<&str>,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE cf_agents_workflows \
                 SET status = ?2, error_name = ?3, error_message = ?4, updated_at = ?5 \
                 WHERE workflow_id = ?1",
                params![workflow_id, status.as_str(), error_name, error_message, now_ms],
            )?;
            Ok(n > 0)
        })
    }

    /// Reset tracking fields after an external restart.
    pub fn reset_workflow(&self, workflow_id: &str, now_ms: u64) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE cf_agents_workflows \
                 SET status = 'queued', error_name = NULL, error_message = NULL, \
                     updated_at = ?2 \
                 WHERE workflow_id = ?1",
                params![workflow_id, now_ms],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_workflow(&self, workflow_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM cf_agents_workflows WHERE workflow_id = ?1",
                params![workflow_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Delete rows matching name/status filters; paging fields are ignored.
    pub fn delete_workflows(&self, criteria: &WorkflowCriteria) -> Result<usize, StoreError> {
        let mut sql = "DELETE FROM cf_agents_workflows WHERE 1=1".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = &criteria.workflow_name {
            sql.push_str(" AND workflow_name = ?");
            args.push(Box::new(name.clone()));
        }
        if let Some(status) = criteria.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        self.with_conn(|conn| {
            let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
            Ok(conn.execute(&sql, params)?)
        })
    }

    /// Re-point rows at a renamed workflow binding.
    pub fn migrate_workflow_binding(&self, old: &str, new: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE cf_agents_workflows SET workflow_name = ?2 WHERE workflow_name = ?1",
                params![old, new],
            )?)
        })
    }

    /// Keyset-paginated listing.
    ///
    /// The cursor carries `(created_at, workflow_id)` of the last returned
    /// row and the WHERE comparison matches the ORDER BY exactly, so pages
    /// concatenate with no duplicates and no gaps. Fetches `limit + 1` rows
    /// to decide whether a next page exists.
    pub fn list_workflows(&self, criteria: &WorkflowCriteria) -> Result<WorkflowPage, StoreError> {
        let limit = criteria.limit.unwrap_or(100).max(1);
        let mut sql = format!("SELECT {SELECT_COLS} FROM cf_agents_workflows WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = &criteria.workflow_name {
            sql.push_str(" AND workflow_name = ?");
            args.push(Box::new(name.clone()));
        }
        if let Some(status) = criteria.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(cursor) = &criteria.cursor {
            if let Some((ts, id)) = decode_cursor(cursor) {
                match criteria.order {
                    SortOrder::Asc => sql.push_str(" AND (created_at, workflow_id) > (?, ?)"),
                    SortOrder::Desc => sql.push_str(" AND (created_at, workflow_id) < (?, ?)"),
                }
                args.push(Box::new(ts));
                args.push(Box::new(id));
            }
        }
        match criteria.order {
            SortOrder::Asc => sql.push_str(" ORDER BY created_at ASC, workflow_id ASC"),
            SortOrder::Desc => sql.push_str(" ORDER BY created_at DESC, workflow_id DESC"),
        }
        sql.push_str(" LIMIT ?");
        args.push(Box::new((limit + 1) as i64));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_workflow(row)?);
            }
            let next_cursor = if out.len() > limit {
                out.truncate(limit);
                out.last().map(encode_cursor)
            } else {
                None
            };
            Ok(WorkflowPage { rows: out, next_cursor })
        })
    }
}

#[cfg(test)]
#[path = "workflows_tests.rs"]
mod tests;
