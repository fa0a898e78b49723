// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot text reductions for surfacing output tails in events and logs:
//! ANSI stripping plus collapsing of repeated-line runs, capped in size.

use crate::filter::{AnsiStripFilter, OutputFilter};

/// Default number of tail lines carried on error events.
pub const TAIL_MAX_LINES: usize = 12;
/// Default byte cap for the rendered tail.
pub const TAIL_MAX_BYTES: usize = 2000;

/// Strip ANSI/control sequences from a complete string.
pub fn strip_ansi(text: &str) -> String {
    let mut filter = AnsiStripFilter::new();
    let mut out = filter.write(text.as_bytes());
    out.extend(filter.flush());
    String::from_utf8_lossy(&out).into_owned()
}

/// Collapse runs of 3+ identical consecutive lines into the line plus a
/// repeat marker.
pub fn collapse_runs(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let mut run = 1;
        while i + run < lines.len() && lines[i + run] == lines[i] {
            run += 1;
        }
        if run >= 3 {
            out.push(lines[i].clone());
            out.push(format!("[repeated {run}x]"));
        } else {
            for _ in 0..run {
                out.push(lines[i].clone());
            }
        }
        i += run;
    }
    out
}

/// Render the last `max_lines` of `lines` as a compact tail: ANSI-stripped,
/// run-collapsed, and truncated to `max_bytes` on a char boundary.
pub fn filtered_tail(lines: &[String], max_lines: usize, max_bytes: usize) -> String {
    let skip = lines.len().saturating_sub(max_lines);
    let stripped: Vec<String> = lines[skip..].iter().map(|l| strip_ansi(l)).collect();
    let collapsed = collapse_runs(&stripped);
    let mut text = collapsed.join("\n");
    if text.len() > max_bytes {
        let mut cut = max_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
#[path = "tail_tests.rs"]
mod tests;
