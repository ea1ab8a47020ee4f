// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable instance state: hydrate, validate, persist, broadcast, notify.

use serde_json::{json, Value};

use crate::agent::StateSource;
use crate::error::EngineError;
use crate::instance::{Instance, STATE_CHANGED_CALLBACK};

impl Instance {
    /// The last-persisted user state.
    ///
    /// First read hydrates from SQL, seeding `initial_state` when nothing
    /// was ever persisted. A corrupt row recovers to `initial_state`
    /// (rewriting it) or, when the agent has none, is cleared so the next
    /// read does not loop on the same garbage.
    pub fn state(&self) -> Result<Option<Value>, EngineError> {
        self.guard_destroyed()?;
        match self.core.store.state_blob()? {
            Some(blob) => match serde_json::from_str(&blob) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!(error = %e, "persisted state is unreadable, recovering");
                    match self.core.agent.initial_state() {
                        Some(initial) => {
                            self.core.store.put_state_blob(&serde_json::to_string(&initial)
                                .map_err(burrow_storage::StoreError::from)?)?;
                            Ok(Some(initial))
                        }
                        None => {
                            self.core.store.clear_state()?;
                            Ok(None)
                        }
                    }
                }
            },
            None => match self.core.agent.initial_state() {
                // Never seed initial state over a state the user explicitly
                // cleared after a set_state.
                Some(initial) if !self.core.store.state_was_changed()? => {
                    self.core.store.put_state_blob(&serde_json::to_string(&initial)
                        .map_err(burrow_storage::StoreError::from)?)?;
                    Ok(Some(initial))
                }
                _ => Ok(None),
            },
        }
    }

    /// Whether `set_state` has ever committed on this instance.
    pub fn state_was_changed(&self) -> Result<bool, EngineError> {
        Ok(self.core.store.state_was_changed()?)
    }

    /// Update the instance state.
    ///
    /// Pipeline, in order: readonly gate (connection sources only), then
    /// synchronous validation, then persist with the was-changed marker,
    /// then broadcast to every protocol-enabled connection except the
    /// source, then enqueue the deferred `on_state_changed` notification.
    /// Validation failure aborts before anything is persisted.
    pub async fn set_state(&self, next: Value, source: StateSource) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        if let StateSource::Connection(conn) = &source {
            if self.is_connection_readonly(conn) {
                return Err(EngineError::ReadonlyConnection(conn.clone()));
            }
        }
        self.core
            .agent
            .validate_state_change(&next, &source)
            .map_err(EngineError::StateRejected)?;

        let blob = serde_json::to_string(&next).map_err(burrow_storage::StoreError::from)?;
        self.core.store.put_state_changed(&blob)?;

        let exclude = match &source {
            StateSource::Connection(conn) => Some(conn.clone()),
            StateSource::Server => None,
        };
        self.broadcast_state(&next, exclude.as_ref()).await;

        let source_json = match &source {
            StateSource::Server => json!("server"),
            StateSource::Connection(conn) => json!({ "connection": conn.as_str() }),
        };
        self.enqueue_internal(
            STATE_CHANGED_CALLBACK,
            json!({ "state": next, "source": source_json }),
        )
        .await?;
        Ok(())
    }

    /// Dispatch the deferred post-persist notification. The broadcast has
    /// already committed by the time this runs; hook failures go to
    /// `on_error` and cannot influence it.
    pub(crate) async fn run_state_changed_callback(&self, payload: &Value) {
        let state = payload.get("state").cloned().unwrap_or(Value::Null);
        let source = match payload.get("source") {
            Some(Value::Object(obj)) => match obj.get("connection").and_then(Value::as_str) {
                Some(id) => StateSource::Connection(id.into()),
                None => StateSource::Server,
            },
            _ => StateSource::Server,
        };
        self.core.agent.on_state_changed(self, &state, &source).await;
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
