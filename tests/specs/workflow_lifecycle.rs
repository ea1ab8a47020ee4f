// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow lifecycle mirroring: callbacks transition the tracking row and
//! terminal statuses win over late callbacks.

use burrow_engine::test_support::harness;
use burrow_engine::{RunWorkflowOptions, WorkflowCallback, WorkflowStatus};
use serde_json::json;

#[tokio::test]
async fn progress_moves_queued_to_running_and_fires_hook() {
    let h = harness();
    let row = h
        .instance
        .run_workflow(
            "deploy",
            json!({"taskId": "t1"}),
            RunWorkflowOptions { id: Some("wf-1".into()), metadata: None },
        )
        .await
        .unwrap();
    assert_eq!(row.status, WorkflowStatus::Queued);

    h.instance
        .on_workflow_callback(WorkflowCallback::Progress {
            workflow_id: "wf-1".into(),
            progress: json!({"p": 1}),
        })
        .await
        .unwrap();

    assert_eq!(
        h.instance.get_workflow("wf-1").unwrap().unwrap().status,
        WorkflowStatus::Running
    );
    assert_eq!(
        h.agent.workflow_progress.lock().clone(),
        vec![("wf-1".to_string(), json!({"p": 1}))]
    );
}

#[tokio::test]
async fn complete_callback_does_not_override_terminated() {
    let h = harness();
    h.instance
        .run_workflow(
            "deploy",
            json!({}),
            RunWorkflowOptions { id: Some("wf-1".into()), metadata: None },
        )
        .await
        .unwrap();
    h.instance.terminate_workflow("deploy", "wf-1").await.unwrap();
    assert_eq!(
        h.instance.get_workflow("wf-1").unwrap().unwrap().status,
        WorkflowStatus::Terminated
    );

    h.instance
        .on_workflow_callback(WorkflowCallback::Complete {
            workflow_id: "wf-1".into(),
            result: json!({"ok": true}),
        })
        .await
        .unwrap();

    assert_eq!(
        h.instance.get_workflow("wf-1").unwrap().unwrap().status,
        WorkflowStatus::Terminated
    );
}

#[tokio::test]
async fn error_callback_records_name_and_message() {
    let h = harness();
    h.instance
        .run_workflow(
            "deploy",
            json!({}),
            RunWorkflowOptions { id: Some("wf-1".into()), metadata: None },
        )
        .await
        .unwrap();

    h.instance
        .on_workflow_callback(WorkflowCallback::Error {
            workflow_id: "wf-1".into(),
            name: "DeployFailed".into(),
            message: "image not found".into(),
        })
        .await
        .unwrap();

    let row = h.instance.get_workflow("wf-1").unwrap().unwrap();
    assert_eq!(row.status, WorkflowStatus::Errored);
    assert_eq!(row.error_name.as_deref(), Some("DeployFailed"));
    assert_eq!(row.error_message.as_deref(), Some("image not found"));
}
