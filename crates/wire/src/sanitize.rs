// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hygiene for error strings that cross the wire.

/// Maximum characters of an error message sent to a client.
pub const MAX_WIRE_ERROR_LEN: usize = 500;

/// Truncate to [`MAX_WIRE_ERROR_LEN`] characters and strip C0 control
/// characters and DEL. Full errors stay in the server-side logs; the wire
/// copy is for display only.
pub fn sanitize_error(msg: &str) -> String {
    msg.chars()
        .filter(|c| !matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}'))
        .take(MAX_WIRE_ERROR_LEN)
        .collect()
}

#[cfg(test)]
#[path = "sanitize_tests.rs"]
mod tests;
