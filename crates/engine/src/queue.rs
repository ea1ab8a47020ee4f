// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable task queue: FIFO of deferred method invocations, drained in the
//! background one item at a time.

use std::sync::atomic::Ordering;

use burrow_core::RetryOptions;
use burrow_storage::QueueRow;
use serde_json::Value;

use crate::error::EngineError;
use crate::instance::Instance;
use crate::scheduler::RetrySource;

impl Instance {
    /// Enqueue a deferred invocation of `callback` and trigger a background
    /// drain. Returns the queue item id.
    pub fn queue(
        &self,
        callback: &str,
        payload: Value,
        retry: Option<RetryOptions>,
    ) -> Result<String, EngineError> {
        self.guard_destroyed()?;
        self.check_callback_name(callback)?;
        let id = self.enqueue(callback, payload, retry)?;
        self.spawn_drain();
        Ok(id)
    }

    /// Engine-internal enqueue, allowed to use reserved callback names.
    pub(crate) async fn enqueue_internal(
        &self,
        callback: &str,
        payload: Value,
    ) -> Result<(), EngineError> {
        self.enqueue(callback, payload, None)?;
        self.spawn_drain();
        Ok(())
    }

    fn enqueue(
        &self,
        callback: &str,
        payload: Value,
        retry: Option<RetryOptions>,
    ) -> Result<String, EngineError> {
        let row = QueueRow {
            id: nanoid::nanoid!(),
            callback: callback.to_string(),
            payload,
            created_at: self.core.clock.epoch_ms(),
            retry,
        };
        self.core.store.put_queue_item(&row)?;
        Ok(row.id)
    }

    fn spawn_drain(&self) {
        let instance = self.clone();
        tokio::spawn(async move {
            instance.drain_queue().await;
        });
    }

    /// Drain the queue to empty. Only one drain runs per instance; callers
    /// that lose the reentrance race return immediately. Public so hosts and
    /// tests can drain deterministically instead of racing the background
    /// task.
    pub async fn drain_queue(&self) {
        loop {
            if self.is_destroyed() {
                return;
            }
            if self.core.queue_draining.swap(true, Ordering::SeqCst) {
                return;
            }
            self.drain_once().await;
            self.core.queue_draining.store(false, Ordering::SeqCst);
            // An item enqueued while the flag was still held may have skipped
            // its own drain; loop if anything is left.
            match self.core.store.next_queue_item() {
                Ok(Some(_)) => continue,
                _ => return,
            }
        }
    }

    async fn drain_once(&self) {
        loop {
            if self.is_destroyed() {
                return;
            }
            let item = match self.core.store.next_queue_item() {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(e) => {
                    self.report_error(e.into()).await;
                    return;
                }
            };
            let retry = RetryOptions::resolve(item.retry, Some(self.core.options.retry));
            let result = self
                .run_callback_with_retry(&item.callback, &item.payload, RetrySource::Queue(&item), retry)
                .await;
            if let Err(e) = result {
                // Awaited before the next item so error handling observes
                // drain order; failures never block further dequeuing.
                self.report_error(e).await;
            }
            // Deleted on success and on final failure alike.
            if let Err(e) = self.core.store.delete_queue_item(&item.id) {
                self.report_error(e.into()).await;
                return;
            }
        }
    }

    /// Remove one queued item by id.
    pub fn dequeue(&self, id: &str) -> Result<bool, EngineError> {
        self.guard_destroyed()?;
        Ok(self.core.store.delete_queue_item(id)?)
    }

    /// Remove every queued item.
    pub fn dequeue_all(&self) -> Result<usize, EngineError> {
        self.guard_destroyed()?;
        Ok(self.core.store.delete_queue_all()?)
    }

    /// Remove every queued item for one callback.
    pub fn dequeue_all_by_callback(&self, callback: &str) -> Result<usize, EngineError> {
        self.guard_destroyed()?;
        Ok(self.core.store.delete_queue_by_callback(callback)?)
    }

    /// Read one queued item.
    pub fn get_queue(&self, id: &str) -> Result<Option<QueueRow>, EngineError> {
        Ok(self.core.store.get_queue_item(id)?)
    }

    /// Read queued items for one callback, in drain order.
    pub fn get_queues(&self, callback: &str) -> Result<Vec<QueueRow>, EngineError> {
        Ok(self.core.store.queue_items_by_callback(callback)?)
    }

    /// Read the whole queue in drain order.
    pub fn queued_items(&self) -> Result<Vec<QueueRow>, EngineError> {
        Ok(self.core.store.queue_items()?)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
