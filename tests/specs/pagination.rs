// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyset pagination over workflow history: pages concatenate to exactly the
//! unpaginated order with no duplicates and no gaps.

use burrow_engine::test_support::harness;
use burrow_engine::{RunWorkflowOptions, SortOrder, WorkflowCriteria};
use serde_json::json;

#[tokio::test]
async fn sixty_rows_paginate_as_25_25_10() {
    let h = harness();
    for i in 0..60 {
        h.instance
            .run_workflow(
                "deploy",
                json!({}),
                RunWorkflowOptions { id: Some(format!("wf-{i:02}")), metadata: None },
            )
            .await
            .unwrap();
        h.clock.advance(std::time::Duration::from_millis(1));
    }

    let mut cursor = None;
    let mut sizes = Vec::new();
    let mut collected = Vec::new();
    loop {
        let page = h
            .instance
            .get_workflows(&WorkflowCriteria {
                limit: Some(25),
                cursor: cursor.clone(),
                order: SortOrder::Asc,
                ..Default::default()
            })
            .unwrap();
        sizes.push(page.rows.len());
        collected.extend(page.rows.iter().map(|r| r.workflow_id.clone()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(sizes, vec![25, 25, 10]);
    let expected: Vec<String> = (0..60).map(|i| format!("wf-{i:02}")).collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn paginated_equals_unpaginated_in_both_directions() {
    let h = harness();
    for i in 0..17 {
        h.instance
            .run_workflow(
                "deploy",
                json!({}),
                RunWorkflowOptions { id: Some(format!("wf-{i:02}")), metadata: None },
            )
            .await
            .unwrap();
        h.clock.advance(std::time::Duration::from_millis(1));
    }

    for order in [SortOrder::Asc, SortOrder::Desc] {
        let full = h
            .instance
            .get_workflows(&WorkflowCriteria { limit: Some(100), order, ..Default::default() })
            .unwrap();
        assert!(full.next_cursor.is_none());

        let mut cursor = None;
        let mut paged = Vec::new();
        loop {
            let page = h
                .instance
                .get_workflows(&WorkflowCriteria {
                    limit: Some(4),
                    cursor: cursor.clone(),
                    order,
                    ..Default::default()
                })
                .unwrap();
            paged.extend(page.rows.iter().map(|r| r.workflow_id.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let expected: Vec<String> = full.rows.iter().map(|r| r.workflow_id.clone()).collect();
        assert_eq!(paged, expected);
    }
}
