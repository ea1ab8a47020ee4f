// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue table: durable FIFO of deferred method invocations.

use burrow_core::RetryOptions;
use rusqlite::{params, Row};
use serde_json::Value;

use crate::store::{Store, StoreError};

/// A queued deferred invocation.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: String,
    pub callback: String,
    pub payload: Value,
    /// Enqueue time, unix milliseconds. Drain order is ascending here,
    /// insertion order as the tiebreak.
    pub created_at: u64,
    pub retry: Option<RetryOptions>,
}

fn row_to_item(row: &Row<'_>) -> Result<QueueRow, StoreError> {
    let payload = match row.get::<_, Option<String>>("payload")? {
        Some(text) => serde_json::from_str(&text)?,
        None => Value::Null,
    };
    let retry = row
        .get::<_, Option<String>>("retry_options")?
        .map(|text| serde_json::from_str(&text))
        .transpose()?;
    Ok(QueueRow {
        id: row.get("id")?,
        callback: row.get("callback")?,
        payload,
        created_at: row.get("created_at")?,
        retry,
    })
}

const SELECT_COLS: &str = "id, payload, callback, created_at, retry_options";

impl Store {
    pub fn put_queue_item(&self, item: &QueueRow) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&item.payload)?;
        let retry = item.retry.map(|r| serde_json::to_string(&r)).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cf_agents_queue \
                 (id, payload, callback, created_at, retry_options) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![item.id, payload, item.callback, item.created_at, retry],
            )?;
            Ok(())
        })
    }

    pub fn get_queue_item(&self, id: &str) -> Result<Option<QueueRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM cf_agents_queue WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_item(row)?)),
                None => Ok(None),
            }
        })
    }

    /// All items in drain order.
    pub fn queue_items(&self) -> Result<Vec<QueueRow>, StoreError> {
        self.queue_query(&format!(
            "SELECT {SELECT_COLS} FROM cf_agents_queue ORDER BY created_at ASC, rowid ASC"
        ))
    }

    /// Items for one callback, in drain order.
    pub fn queue_items_by_callback(&self, callback: &str) -> Result<Vec<QueueRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM cf_agents_queue \
                 WHERE callback = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query(params![callback])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_item(row)?);
            }
            Ok(out)
        })
    }

    /// Oldest item, if any. The drain loop re-reads after every deletion so
    /// items enqueued mid-drain are picked up.
    pub fn next_queue_item(&self) -> Result<Option<QueueRow>, StoreError> {
        let mut items = self.queue_query(&format!(
            "SELECT {SELECT_COLS} FROM cf_agents_queue \
             ORDER BY created_at ASC, rowid ASC LIMIT 1"
        ))?;
        Ok(items.pop())
    }

    pub fn delete_queue_item(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM cf_agents_queue WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    /// Delete every queued item, returning how many were removed.
    pub fn delete_queue_all(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM cf_agents_queue", [])?))
    }

    /// Delete every queued item for one callback.
    pub fn delete_queue_by_callback(&self, callback: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM cf_agents_queue WHERE callback = ?1",
                params![callback],
            )?)
        })
    }

    fn queue_query(&self, sql: &str) -> Result<Vec<QueueRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_item(row)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
