// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn item(id: &str, callback: &str, created_at: u64) -> QueueRow {
    QueueRow {
        id: id.into(),
        callback: callback.into(),
        payload: json!({"id": id}),
        created_at,
        retry: None,
    }
}

#[test]
fn items_drain_in_created_at_order() {
    let store = Store::open_in_memory().unwrap();
    store.put_queue_item(&item("c", "work", 30)).unwrap();
    store.put_queue_item(&item("a", "work", 10)).unwrap();
    store.put_queue_item(&item("b", "work", 20)).unwrap();

    let ids: Vec<String> = store.queue_items().unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let next = store.next_queue_item().unwrap().unwrap();
    assert_eq!(next.id, "a");
}

#[test]
fn same_timestamp_preserves_insertion_order() {
    let store = Store::open_in_memory().unwrap();
    store.put_queue_item(&item("first", "work", 100)).unwrap();
    store.put_queue_item(&item("second", "work", 100)).unwrap();

    let ids: Vec<String> = store.queue_items().unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["first", "second"]);
}

#[test]
fn delete_by_id_and_all() {
    let store = Store::open_in_memory().unwrap();
    store.put_queue_item(&item("a", "work", 1)).unwrap();
    store.put_queue_item(&item("b", "work", 2)).unwrap();

    assert!(store.delete_queue_item("a").unwrap());
    assert!(!store.delete_queue_item("a").unwrap());
    assert_eq!(store.delete_queue_all().unwrap(), 1);
    assert!(store.next_queue_item().unwrap().is_none());
}

#[test]
fn filter_and_delete_by_callback() {
    let store = Store::open_in_memory().unwrap();
    store.put_queue_item(&item("a", "send_email", 1)).unwrap();
    store.put_queue_item(&item("b", "resize_image", 2)).unwrap();
    store.put_queue_item(&item("c", "send_email", 3)).unwrap();

    let emails = store.queue_items_by_callback("send_email").unwrap();
    assert_eq!(emails.len(), 2);

    assert_eq!(store.delete_queue_by_callback("send_email").unwrap(), 2);
    assert_eq!(store.queue_items().unwrap().len(), 1);
}

#[test]
fn payload_and_retry_round_trip() {
    let store = Store::open_in_memory().unwrap();
    let mut row = item("a", "work", 1);
    row.retry = Some(burrow_core::RetryOptions { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0 });
    store.put_queue_item(&row).unwrap();

    let got = store.get_queue_item("a").unwrap().unwrap();
    assert_eq!(got.payload, json!({"id": "a"}));
    assert_eq!(got.retry, row.retry);
}
