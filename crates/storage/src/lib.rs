// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! burrow-storage: embedded SQL persistence for one agent instance.
//!
//! Each instance exclusively owns one SQLite database holding five tables:
//! state, schedules, queue, fibers, and workflows. The instance is the only
//! reader and writer; the [`Store`] handle is the single choke point every
//! component goes through.

mod fibers;
mod queue;
mod schedules;
mod state;
mod store;
mod workflows;

pub use fibers::{FiberRow, FiberStatus};
pub use queue::QueueRow;
pub use schedules::{ScheduleCriteria, ScheduleKind, ScheduleRow};
pub use store::{Store, StoreError};
pub use workflows::{
    SortOrder, WorkflowCriteria, WorkflowPage, WorkflowRow, WorkflowStatus,
};
