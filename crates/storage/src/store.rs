// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store handle, schema creation, and idempotent column migrations.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Errors from the embedded SQL store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workflow id already tracked: {0}")]
    DuplicateWorkflow(String),
    #[error("corrupt {table} row {id}: {detail}")]
    CorruptRow { table: &'static str, id: String, detail: String },
}

/// Schema statements for a fresh database.
///
/// Columns added after the initial schema go through [`Store::add_column`]
/// instead so existing databases upgrade in place.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cf_agents_state (
    id    TEXT PRIMARY KEY NOT NULL,
    state TEXT
);
CREATE TABLE IF NOT EXISTS cf_agents_schedules (
    id                   TEXT PRIMARY KEY NOT NULL,
    callback             TEXT NOT NULL,
    payload              TEXT,
    type                 TEXT NOT NULL CHECK(type IN ('scheduled','delayed','cron','interval')),
    time                 INTEGER NOT NULL,
    delay_in_seconds     INTEGER,
    cron                 TEXT,
    interval_seconds     INTEGER
);
CREATE TABLE IF NOT EXISTS cf_agents_queue (
    id         TEXT PRIMARY KEY NOT NULL,
    payload    TEXT,
    callback   TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cf_agents_queue_created_at
    ON cf_agents_queue (created_at);
CREATE TABLE IF NOT EXISTS cf_agents_fibers (
    id           TEXT PRIMARY KEY NOT NULL,
    callback     TEXT NOT NULL,
    payload      TEXT,
    snapshot     TEXT,
    status       TEXT NOT NULL,
    retry_count  INTEGER NOT NULL DEFAULT 0,
    max_retries  INTEGER NOT NULL DEFAULT 3,
    result       TEXT,
    error        TEXT,
    created_at   INTEGER NOT NULL,
    started_at   INTEGER,
    completed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_cf_agents_fibers_status
    ON cf_agents_fibers (status);
CREATE TABLE IF NOT EXISTS cf_agents_workflows (
    id            TEXT PRIMARY KEY NOT NULL,
    workflow_id   TEXT NOT NULL UNIQUE,
    workflow_name TEXT NOT NULL,
    status        TEXT NOT NULL,
    metadata      TEXT,
    error_name    TEXT,
    error_message TEXT,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cf_agents_workflows_cursor
    ON cf_agents_workflows (created_at, workflow_id);
";

/// The five tables owned by an instance, in destroy order.
const TABLES: [&str; 5] = [
    "cf_agents_state",
    "cf_agents_schedules",
    "cf_agents_queue",
    "cf_agents_fibers",
    "cf_agents_workflows",
];

/// Handle to an instance's embedded SQL database.
///
/// The connection lives behind a mutex so fiber tasks and the alarm loop can
/// share the handle; the lock is only ever held for the duration of one
/// statement, never across an await.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests and ephemeral instances.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Create missing tables, then apply add-column migrations.
    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        // v2: interval execution tracking and per-row retry overrides.
        Self::add_column(&conn, "cf_agents_schedules", "running INTEGER NOT NULL DEFAULT 0")?;
        Self::add_column(&conn, "cf_agents_schedules", "execution_started_at INTEGER")?;
        Self::add_column(&conn, "cf_agents_schedules", "retry_options TEXT")?;
        Self::add_column(&conn, "cf_agents_queue", "retry_options TEXT")?;
        Ok(())
    }

    /// `ALTER TABLE ... ADD COLUMN`, treating "duplicate column name" as done.
    fn add_column(conn: &Connection, table: &str, column_def: &str) -> Result<(), StoreError> {
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column_def}");
        match conn.execute(&sql, []) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqlInputError { msg, .. })
                if msg.contains("duplicate column name") =>
            {
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
                if msg.contains("duplicate column name") =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop all five tables. Called once, from instance destroy.
    pub fn drop_all(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        for table in TABLES {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        }
        tracing::debug!("dropped all instance tables");
        Ok(())
    }

    /// Run `f` with the connection locked.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
