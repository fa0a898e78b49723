// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::OutputBuffer;

#[test]
fn empty_until_first_append() {
    let mut buf = OutputBuffer::new(8);
    assert!(buf.is_empty());
    assert_eq!(buf.lines(), Vec::<String>::new());
    buf.append(b"");
    assert!(buf.is_empty());
}

#[test]
fn carry_is_final_entry() {
    let mut buf = OutputBuffer::new(8);
    buf.append(b"hel");
    assert_eq!(buf.lines(), vec!["hel"]);
    buf.append(b"lo\nwor");
    assert_eq!(buf.lines(), vec!["hello", "wor"]);
}

#[test]
fn trailing_newline_leaves_empty_carry() {
    let mut buf = OutputBuffer::new(8);
    buf.append(b"a\nb\n");
    assert_eq!(buf.lines(), vec!["a", "b", ""]);
}

#[test]
fn overflow_drops_oldest_completed() {
    let mut buf = OutputBuffer::new(2);
    buf.append(b"one\ntwo\nthree\n");
    assert_eq!(buf.lines(), vec!["three", ""]);
}

#[test]
fn cr_preserved_in_line() {
    let mut buf = OutputBuffer::new(8);
    buf.append(b"progress\rdone\n");
    assert_eq!(buf.lines(), vec!["progress\rdone", ""]);
}

#[test]
fn split_across_many_appends_concatenates() {
    let mut buf = OutputBuffer::new(16);
    for chunk in [&b"ab"[..], b"c\nd", b"ef", b"\n"] {
        buf.append(chunk);
    }
    assert_eq!(buf.lines(), vec!["abc", "def", ""]);
}

#[test]
fn recent_returns_tail() {
    let mut buf = OutputBuffer::new(16);
    buf.append(b"1\n2\n3\n4");
    assert_eq!(buf.recent(2), vec!["3", "4"]);
    assert_eq!(buf.recent(100), vec!["1", "2", "3", "4"]);
}

#[test]
fn invalid_utf8_replaced() {
    let mut buf = OutputBuffer::new(8);
    buf.append(&[0x61, 0xff, 0x62, b'\n']);
    assert_eq!(buf.lines(), vec!["a\u{fffd}b", ""]);
}
