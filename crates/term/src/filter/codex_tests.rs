// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::CodexTuiFilter;
use crate::filter::OutputFilter;

fn run(chunks: &[&[u8]]) -> String {
    let mut filter = CodexTuiFilter::new();
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(filter.write(chunk));
    }
    out.extend(filter.flush());
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn drops_chrome_lines() {
    let input = b"real output\n  OpenAI Codex v1.2\n42% context left\nmore output\n";
    assert_eq!(run(&[input]), "real output\nmore output\n");
}

#[test]
fn match_is_case_insensitive_and_trimmed() {
    assert_eq!(run(&[b"   PRESS CTRL+C to quit   \nkeep\n"]), "keep\n");
    assert_eq!(run(&[b"1234 Tokens Left\nkeep\n"]), "keep\n");
}

#[test]
fn partial_lines_buffer_across_writes() {
    let out = run(&[b"openai ", b"codex banner\nuser ", b"text\n"]);
    assert_eq!(out, "user text\n");
}

#[test]
fn flush_emits_trailing_partial() {
    assert_eq!(run(&[b"no newline"]), "no newline");
}

#[test]
fn flush_drops_trailing_chrome_partial() {
    assert_eq!(run(&[b"press ctrl+d"]), "");
}

#[test]
fn stats_track_dropped_lines() {
    let mut filter = CodexTuiFilter::new();
    let _ = filter.write(b"tokens left: 5\nok\n");
    let stats = filter.stats();
    assert_eq!(stats.dropped_bytes, 15); // "tokens left: 5\n"
    assert_eq!(stats.out_bytes, 3); // "ok\n"
}
