// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State table: one serialized user-state blob plus a was-changed marker.

use rusqlite::{params, OptionalExtension};

use crate::store::{Store, StoreError};

/// Row id for the serialized user state.
const STATE_ROW: &str = "STATE";
/// Row id marking that `set_state` has been called at least once.
const STATE_WAS_CHANGED_ROW: &str = "STATE_WAS_CHANGED";

impl Store {
    /// Read the raw serialized state blob, if any.
    pub fn state_blob(&self) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT state FROM cf_agents_state WHERE id = ?1",
                    params![STATE_ROW],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten())
        })
    }

    /// Overwrite the serialized state blob.
    pub fn put_state_blob(&self, blob: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cf_agents_state (id, state) VALUES (?1, ?2)",
                params![STATE_ROW, blob],
            )?;
            Ok(())
        })
    }

    /// Write state and the was-changed marker in one transaction.
    pub fn put_state_changed(&self, blob: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| -> Result<(), StoreError> {
                conn.execute(
                    "INSERT OR REPLACE INTO cf_agents_state (id, state) VALUES (?1, ?2)",
                    params![STATE_ROW, blob],
                )?;
                conn.execute(
                    "INSERT OR REPLACE INTO cf_agents_state (id, state) VALUES (?1, ?2)",
                    params![STATE_WAS_CHANGED_ROW, "true"],
                )?;
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT")?,
                Err(_) => conn.execute_batch("ROLLBACK")?,
            }
            result
        })
    }

    /// Whether `set_state` has ever committed on this instance.
    pub fn state_was_changed(&self) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT state FROM cf_agents_state WHERE id = ?1",
                    params![STATE_WAS_CHANGED_ROW],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten()
                .as_deref()
                == Some("true"))
        })
    }

    /// Delete the state row, leaving the was-changed marker untouched.
    ///
    /// Used for corrupt-state recovery when no initial state exists.
    pub fn clear_state(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM cf_agents_state WHERE id = ?1",
                params![STATE_ROW],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
