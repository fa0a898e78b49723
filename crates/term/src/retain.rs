// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention cleaner: prunes session-log files by age, always keeping the
//! newest few per terminal.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many files per terminal survive regardless of age.
pub const DEFAULT_KEEP_NEWEST: usize = 5;
/// Scan cadence once the cleaner is running.
const SCAN_INTERVAL: Duration = Duration::from_secs(3600);

/// One parsed `<terminalID>-YYYYMMDD-HHMMSS.txt` entry.
#[derive(Debug, Clone)]
pub struct SessionLogFile {
    pub path: PathBuf,
    pub terminal_id: String,
    pub mod_time: SystemTime,
}

/// Parse a session-log file name into its terminal id. Returns `None` for
/// names that do not match the transcript shape (including `.raw.txt`
/// siblings and event logs).
pub fn parse_log_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".txt")?;
    if stem.ends_with(".raw") {
        return None;
    }
    // Trailing "<terminalID>-YYYYMMDD-HHMMSS": 8 digits, '-', 6 digits.
    if stem.len() < 16 {
        return None;
    }
    let (prefix, ts) = stem.split_at(stem.len() - 15);
    let terminal_id = prefix.strip_suffix('-')?;
    if terminal_id.is_empty() {
        return None;
    }
    let (date, time) = ts.split_at(8);
    let time = time.strip_prefix('-')?;
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if time.len() != 6 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(terminal_id.to_owned())
}

/// Scan `dir` for session-log files grouped by terminal id.
pub fn scan_log_dir(dir: &Path) -> Vec<SessionLogFile> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "retention scan failed: {e}");
            return vec![];
        }
    };

    let mut files = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(terminal_id) = parse_log_name(&name) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mod_time = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push(SessionLogFile { path: entry.path(), terminal_id, mod_time });
    }
    files
}

/// Decide which files to delete: per terminal, keep everything newer than
/// the threshold plus the `keep_newest` most recent regardless of age.
pub fn select_expired(
    files: Vec<SessionLogFile>,
    threshold: SystemTime,
    keep_newest: usize,
) -> Vec<SessionLogFile> {
    let mut by_terminal: std::collections::HashMap<String, Vec<SessionLogFile>> =
        std::collections::HashMap::new();
    for file in files {
        by_terminal.entry(file.terminal_id.clone()).or_default().push(file);
    }

    let mut expired = Vec::new();
    for (_, mut group) in by_terminal {
        // Newest first.
        group.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
        for (idx, file) in group.into_iter().enumerate() {
            if idx < keep_newest || file.mod_time >= threshold {
                continue;
            }
            expired.push(file);
        }
    }
    expired
}

/// One cleanup pass. Missing-file races are ignored; other errors warn.
pub fn clean_once(dir: &Path, retention_days: u32, keep_newest: usize) {
    let threshold = SystemTime::now()
        - Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let files = scan_log_dir(dir);
    let expired = select_expired(files, threshold, keep_newest);
    for file in expired {
        match std::fs::remove_file(&file.path) {
            Ok(()) => debug!(path = %file.path.display(), "removed expired session log"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %file.path.display(), "failed to remove session log: {e}"),
        }
    }
}

/// Spawn the hourly cleaner; the first pass runs immediately.
pub fn spawn_cleaner(
    dir: PathBuf,
    retention_days: u32,
    keep_newest: usize,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let dir = dir.clone();
                    let done = tokio::task::spawn_blocking(move || {
                        clean_once(&dir, retention_days, keep_newest);
                    })
                    .await;
                    if done.is_err() {
                        warn!("retention pass panicked");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "retain_tests.rs"]
mod tests;
