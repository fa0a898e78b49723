// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory input history: trimmed commands with UTC timestamps.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One command accepted into a session's input history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEntry {
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl InputEntry {
    /// Entry stamped with the current UTC time.
    pub fn now(command: impl Into<String>) -> Self {
        Self { command: command.into(), timestamp: Utc::now() }
    }
}

/// Bounded, mutex-serialized history of recent commands.
#[derive(Debug)]
pub struct InputBuffer {
    entries: Mutex<VecDeque<InputEntry>>,
    max_entries: usize,
}

impl InputBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), max_entries: max_entries.max(1) }
    }

    /// Append a command with the current timestamp. Whitespace-only input is
    /// discarded.
    pub fn append(&self, command: &str) {
        self.append_entry(InputEntry::now(command));
    }

    /// Append a pre-stamped entry. The command is trimmed; empty commands are
    /// discarded. Oldest entries are evicted past capacity.
    pub fn append_entry(&self, entry: InputEntry) {
        let command = entry.command.trim();
        if command.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        entries.push_back(InputEntry { command: command.to_owned(), timestamp: entry.timestamp });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// All entries in insertion order.
    pub fn list(&self) -> Vec<InputEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The last `n` entries (or all when fewer).
    pub fn recent(&self, n: usize) -> Vec<InputEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
