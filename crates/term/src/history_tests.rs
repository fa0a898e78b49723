// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{TimeZone, Utc};

use super::{InputBuffer, InputEntry};

#[test]
fn trims_and_discards_empty() {
    let buf = InputBuffer::new(8);
    buf.append("  ls -la  ");
    buf.append("   ");
    buf.append("");
    let entries = buf.list();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].command, "ls -la");
}

#[test]
fn evicts_oldest_on_overflow() {
    let buf = InputBuffer::new(2);
    buf.append("one");
    buf.append("two");
    buf.append("three");
    let commands: Vec<_> = buf.list().into_iter().map(|e| e.command).collect();
    assert_eq!(commands, vec!["two", "three"]);
}

#[test]
fn recent_returns_last_n() {
    let buf = InputBuffer::new(8);
    for cmd in ["a", "b", "c"] {
        buf.append(cmd);
    }
    let recent: Vec<_> = buf.recent(2).into_iter().map(|e| e.command).collect();
    assert_eq!(recent, vec!["b", "c"]);
    assert_eq!(buf.recent(10).len(), 3);
}

#[test]
fn entry_serializes_with_rfc3339_timestamp() -> anyhow::Result<()> {
    let ts = Utc
        .with_ymd_and_hms(2026, 7, 4, 12, 30, 45)
        .single()
        .ok_or_else(|| anyhow::anyhow!("bad timestamp"))?;
    let entry = InputEntry { command: "status".into(), timestamp: ts };
    let json = serde_json::to_string(&entry)?;
    assert!(json.contains(r#""Command":"status""#), "json: {json}");
    assert!(json.contains(r#""Timestamp":"2026-07-04T12:30:45Z""#), "json: {json}");

    let back: InputEntry = serde_json::from_str(&json)?;
    assert_eq!(back, entry);
    Ok(())
}
