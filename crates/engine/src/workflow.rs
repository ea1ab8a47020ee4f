// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow tracker: a local, queryable mirror of externally-executed
//! workflow lifecycles, plus the adapter seam to the external runtime.

use async_trait::async_trait;
use burrow_storage::{WorkflowCriteria, WorkflowPage, WorkflowRow, WorkflowStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::error::EngineError;
use crate::instance::Instance;

/// Errors from the external workflow runtime.
#[derive(Debug, Error)]
pub enum WorkflowRuntimeError {
    /// The named operation is not implemented by this runtime. Propagated
    /// unchanged, never swallowed.
    #[error("not implemented: {0}")]
    Unsupported(String),
    /// Worth retrying.
    #[error("transient workflow runtime error: {0}")]
    Transient(String),
    #[error("workflow runtime error: {0}")]
    Other(String),
}

/// Adapter to the system that actually executes workflows. The engine only
/// tracks state and forwards operations; execution is out of scope.
#[async_trait]
pub trait WorkflowRuntime: Send + Sync + 'static {
    /// Whether a workflow binding with this name exists in the environment.
    fn has_binding(&self, name: &str) -> bool;

    /// Create a workflow instance with the chosen id.
    async fn create(
        &self,
        name: &str,
        workflow_id: &str,
        params: Value,
    ) -> Result<(), WorkflowRuntimeError>;

    /// Forward an opaque event to a running workflow.
    async fn send_event(
        &self,
        name: &str,
        workflow_id: &str,
        event: Value,
    ) -> Result<(), WorkflowRuntimeError>;

    /// Poll the external status.
    async fn status(
        &self,
        name: &str,
        workflow_id: &str,
    ) -> Result<WorkflowStatus, WorkflowRuntimeError>;

    async fn terminate(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError>;

    async fn pause(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError>;

    async fn resume(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError>;

    async fn restart(&self, name: &str, workflow_id: &str) -> Result<(), WorkflowRuntimeError>;
}

/// Lifecycle callback delivered by the external runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkflowCallback {
    Progress {
        #[serde(rename = "workflowId")]
        workflow_id: String,
        progress: Value,
    },
    Complete {
        #[serde(rename = "workflowId")]
        workflow_id: String,
        result: Value,
    },
    Error {
        #[serde(rename = "workflowId")]
        workflow_id: String,
        name: String,
        message: String,
    },
    Event {
        #[serde(rename = "workflowId")]
        workflow_id: String,
        event: Value,
    },
}

/// Options for [`Instance::run_workflow`].
#[derive(Debug, Clone, Default)]
pub struct RunWorkflowOptions {
    /// External workflow id; generated when absent.
    pub id: Option<String>,
    /// Opaque metadata stored on the tracking row.
    pub metadata: Option<Value>,
}

impl Instance {
    /// Launch a named workflow and start tracking it locally.
    ///
    /// Identity fields are injected into the params so callbacks can route
    /// back to this instance. A duplicate workflow id is a named error.
    pub async fn run_workflow(
        &self,
        name: &str,
        params: Value,
        opts: RunWorkflowOptions,
    ) -> Result<WorkflowRow, EngineError> {
        self.guard_destroyed()?;
        if !self.core.runtime.has_binding(name) {
            return Err(EngineError::UnknownWorkflowBinding(name.to_string()));
        }
        let workflow_id = opts.id.unwrap_or_else(|| nanoid::nanoid!());

        let mut params_obj = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        params_obj.insert("agentName".to_string(), json!(self.core.name));
        params_obj.insert("workflowId".to_string(), json!(workflow_id));

        let now_ms = self.core.clock.epoch_ms();
        let row = WorkflowRow {
            id: nanoid::nanoid!(),
            workflow_id: workflow_id.clone(),
            workflow_name: name.to_string(),
            status: WorkflowStatus::Queued,
            metadata: opts.metadata,
            error_name: None,
            error_message: None,
            created_at: now_ms,
            updated_at: now_ms,
        };
        // Insert first so a duplicate id fails before the external create.
        self.core.store.insert_workflow(&row)?;
        if let Err(e) = self
            .core
            .runtime
            .create(name, &workflow_id, Value::Object(params_obj))
            .await
        {
            self.core.store.delete_workflow(&workflow_id)?;
            return Err(e.into());
        }
        Ok(row)
    }

    /// Forward an opaque event, retrying transient runtime failures under
    /// the class retry policy.
    pub async fn send_workflow_event(
        &self,
        name: &str,
        workflow_id: &str,
        event: Value,
    ) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        let retry = self.core.options.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.core.runtime.send_event(name, workflow_id, event.clone()).await {
                Ok(()) => return Ok(()),
                Err(WorkflowRuntimeError::Transient(msg)) if attempt < max_attempts => {
                    let delay = retry.backoff_delay(attempt);
                    tracing::info!(
                        workflow_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "workflow event send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a structured approval event.
    pub async fn approve_workflow(
        &self,
        name: &str,
        workflow_id: &str,
        extra: Option<Value>,
    ) -> Result<(), EngineError> {
        self.send_approval(name, workflow_id, true, extra).await
    }

    /// Send a structured rejection event.
    pub async fn reject_workflow(
        &self,
        name: &str,
        workflow_id: &str,
        extra: Option<Value>,
    ) -> Result<(), EngineError> {
        self.send_approval(name, workflow_id, false, extra).await
    }

    async fn send_approval(
        &self,
        name: &str,
        workflow_id: &str,
        approved: bool,
        extra: Option<Value>,
    ) -> Result<(), EngineError> {
        let mut payload = Map::new();
        payload.insert("approved".to_string(), json!(approved));
        if let Some(Value::Object(map)) = extra {
            for (k, v) in map {
                payload.entry(k).or_insert(v);
            }
        }
        self.send_workflow_event(
            name,
            workflow_id,
            json!({ "type": "approval", "payload": Value::Object(payload) }),
        )
        .await
    }

    pub async fn terminate_workflow(
        &self,
        name: &str,
        workflow_id: &str,
    ) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        self.core.runtime.terminate(name, workflow_id).await?;
        self.refresh_workflow_status(name, workflow_id).await
    }

    pub async fn pause_workflow(&self, name: &str, workflow_id: &str) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        self.core.runtime.pause(name, workflow_id).await?;
        self.refresh_workflow_status(name, workflow_id).await
    }

    pub async fn resume_workflow(&self, name: &str, workflow_id: &str) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        self.core.runtime.resume(name, workflow_id).await?;
        self.refresh_workflow_status(name, workflow_id).await
    }

    /// Restart the external workflow. With `reset`, local tracking fields
    /// (status and error) are cleared back to queued first.
    pub async fn restart_workflow(
        &self,
        name: &str,
        workflow_id: &str,
        reset: bool,
    ) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        self.core.runtime.restart(name, workflow_id).await?;
        if reset {
            self.core
                .store
                .reset_workflow(workflow_id, self.core.clock.epoch_ms())?;
        }
        self.refresh_workflow_status(name, workflow_id).await
    }

    /// Poll the external status and mirror it locally.
    async fn refresh_workflow_status(
        &self,
        name: &str,
        workflow_id: &str,
    ) -> Result<(), EngineError> {
        let status = self.core.runtime.status(name, workflow_id).await?;
        self.core.store.update_workflow_status(
            workflow_id,
            status,
            None,
            None,
            self.core.clock.epoch_ms(),
        )?;
        Ok(())
    }

    /// Ingress for lifecycle callbacks from the external runtime.
    ///
    /// Progress moves queued/waiting rows to running; complete and error are
    /// ignored for rows already terminated or paused; events are forwarded
    /// to the agent without touching the row.
    pub async fn on_workflow_callback(
        &self,
        callback: WorkflowCallback,
    ) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        self.core.agent.on_workflow_callback(self, &callback).await;
        let now_ms = self.core.clock.epoch_ms();
        match &callback {
            WorkflowCallback::Progress { workflow_id, progress } => {
                let Some(row) = self.core.store.get_workflow(workflow_id)? else {
                    return Ok(());
                };
                if matches!(row.status, WorkflowStatus::Queued | WorkflowStatus::Waiting) {
                    self.core.store.update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Running,
                        None,
                        None,
                        now_ms,
                    )?;
                }
                let row = self.core.store.get_workflow(workflow_id)?.unwrap_or(row);
                self.core.agent.on_workflow_progress(self, &row, progress).await;
            }
            WorkflowCallback::Complete { workflow_id, result } => {
                let Some(row) = self.core.store.get_workflow(workflow_id)? else {
                    return Ok(());
                };
                if !matches!(row.status, WorkflowStatus::Terminated | WorkflowStatus::Paused) {
                    self.core.store.update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Complete,
                        None,
                        None,
                        now_ms,
                    )?;
                }
                let row = self.core.store.get_workflow(workflow_id)?.unwrap_or(row);
                self.core.agent.on_workflow_complete(self, &row, result).await;
            }
            WorkflowCallback::Error { workflow_id, name, message } => {
                let Some(row) = self.core.store.get_workflow(workflow_id)? else {
                    return Ok(());
                };
                if !matches!(
                    row.status,
                    WorkflowStatus::Terminated
                        | WorkflowStatus::Complete
                        | WorkflowStatus::Paused
                ) {
                    self.core.store.update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Errored,
                        Some(name),
                        Some(message),
                        now_ms,
                    )?;
                }
                let row = self.core.store.get_workflow(workflow_id)?.unwrap_or(row);
                self.core.agent.on_workflow_error(self, &row).await;
            }
            WorkflowCallback::Event { workflow_id, event } => {
                self.core.agent.on_workflow_event(self, workflow_id, event).await;
            }
        }
        Ok(())
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRow>, EngineError> {
        Ok(self.core.store.get_workflow(workflow_id)?)
    }

    /// Keyset-paginated listing; see [`WorkflowCriteria`].
    pub fn get_workflows(&self, criteria: &WorkflowCriteria) -> Result<WorkflowPage, EngineError> {
        Ok(self.core.store.list_workflows(criteria)?)
    }

    pub fn delete_workflow(&self, workflow_id: &str) -> Result<bool, EngineError> {
        self.guard_destroyed()?;
        Ok(self.core.store.delete_workflow(workflow_id)?)
    }

    pub fn delete_workflows(&self, criteria: &WorkflowCriteria) -> Result<usize, EngineError> {
        self.guard_destroyed()?;
        Ok(self.core.store.delete_workflows(criteria)?)
    }

    /// Re-point tracked rows after a workflow binding is renamed.
    pub fn migrate_workflow_binding(&self, old: &str, new: &str) -> Result<usize, EngineError> {
        self.guard_destroyed()?;
        Ok(self.core.store.migrate_workflow_binding(old, new)?)
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
