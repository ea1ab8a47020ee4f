// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    plain = { "connection refused", "connection refused" },
    newlines = { "line1\nline2\r\n", "line1line2" },
    bell_and_del = { "a\u{0007}b\u{007f}c", "abc" },
    tabs = { "col1\tcol2", "col1col2" },
)]
fn strips_control_characters(input: &str, expected: &str) {
    assert_eq!(sanitize_error(input), expected);
}

#[test]
fn truncates_to_limit() {
    let long = "x".repeat(2_000);
    assert_eq!(sanitize_error(&long).chars().count(), MAX_WIRE_ERROR_LEN);
}

#[test]
fn truncation_counts_chars_not_bytes() {
    let long = "é".repeat(600);
    let out = sanitize_error(&long);
    assert_eq!(out.chars().count(), MAX_WIRE_ERROR_LEN);
}

#[test]
fn preserves_non_ascii_text() {
    assert_eq!(sanitize_error("ошибка: 接続失敗"), "ошибка: 接続失敗");
}
