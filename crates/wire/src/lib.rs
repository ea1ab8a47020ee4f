// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection protocol for agent instances.
//!
//! Wire format: one JSON object per text frame, discriminated by a literal
//! `type` field. Transport (how frames reach the instance) is someone else's
//! problem; this crate only defines the frames and the hygiene rules for
//! errors that cross the wire.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod message;
mod sanitize;

pub use message::{Incoming, Outgoing, ProtocolError, RpcResponse};
pub use sanitize::{sanitize_error, MAX_WIRE_ERROR_LEN};
