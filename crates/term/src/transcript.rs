// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed file loggers layered on [`AsyncFileLogger`].
//!
//! - session transcript: raw PTY bytes to `<dir>/<id>-<ts>.txt`
//! - input history: JSONL command entries to `<dir>/<name>-<ts>.jsonl`
//! - MCP events: one notification line per entry to `<dir>/Events-<id>-<ts>`
//!
//! Timestamps in file names are UTC `YYYYMMDD-HHMMSS`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::history::InputEntry;
use crate::logger::{AsyncFileLogger, BackpressurePolicy, LoggerConfig, LoggerStats};

/// Format a UTC instant the way log file names expect it.
pub fn log_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d-%H%M%S").to_string()
}

/// `<id>-<ts>.txt`
pub fn session_log_name(terminal_id: &str, ts: &str) -> String {
    format!("{terminal_id}-{ts}.txt")
}

/// `<name>-<ts>.jsonl`
pub fn input_log_name(name: &str, ts: &str) -> String {
    format!("{name}-{ts}.jsonl")
}

/// `Events-<sessionID>-<ts>` (no extension)
pub fn mcp_event_log_name(session_id: &str, ts: &str) -> String {
    format!("Events-{session_id}-{ts}")
}

/// Sibling raw-transcript path: `<base>.raw.txt` next to `<base>.txt`.
pub fn raw_sibling_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".raw.txt");
    path.with_file_name(name)
}

fn open_append(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::OpenOptions::new().create(true).append(true).open(path)?)
}

/// Raw PTY transcript writer with an optional total byte cap.
pub struct SessionLogger {
    inner: AsyncFileLogger<Bytes>,
}

impl SessionLogger {
    /// Open `<dir>/<id>-<ts>.txt` and start the writer.
    pub fn create(
        dir: &Path,
        terminal_id: &str,
        ts: &str,
        max_bytes: Option<u64>,
        config: LoggerConfig,
    ) -> anyhow::Result<Self> {
        let path = dir.join(session_log_name(terminal_id, ts));
        Self::open(path, max_bytes, config)
    }

    /// Open an explicit path (used for the raw sibling transcript).
    pub fn open(path: PathBuf, max_bytes: Option<u64>, config: LoggerConfig) -> anyhow::Result<Self> {
        let file = open_append(&path)?;
        // Remaining-byte allowance shared with the encoder; the worker
        // drains sequentially so relaxed loads are enough.
        let encoder: crate::logger::Encoder<Bytes> = match max_bytes {
            None => Box::new(|chunk: &Bytes| Some(chunk.clone())),
            Some(cap) => {
                let remaining = Arc::new(AtomicU64::new(cap));
                Box::new(move |chunk: &Bytes| {
                    let rem = remaining.load(Ordering::Relaxed);
                    if rem == 0 {
                        return None;
                    }
                    let take = (chunk.len() as u64).min(rem);
                    remaining.store(rem - take, Ordering::Relaxed);
                    Some(chunk.slice(..take as usize))
                })
            }
        };
        Ok(Self { inner: AsyncFileLogger::new(path, file, config, encoder) })
    }

    pub async fn write(&self, chunk: Bytes) {
        self.inner.write(chunk).await;
    }

    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn stats(&self) -> LoggerStats {
        self.inner.stats()
    }
}

/// JSONL input-history writer.
pub struct InputLogger {
    inner: AsyncFileLogger<InputEntry>,
}

impl InputLogger {
    /// Defaults per the input-history contract: drop-oldest, capacity 256,
    /// 4 KiB threshold, 1 s interval.
    pub fn default_config() -> LoggerConfig {
        LoggerConfig {
            flush_interval: Duration::from_secs(1),
            flush_threshold: 4096,
            capacity: 256,
            policy: BackpressurePolicy::DropOldest,
        }
    }

    /// Open `<dir>/<name>-<ts>.jsonl` and start the writer.
    pub fn create(dir: &Path, name: &str, ts: &str, config: LoggerConfig) -> anyhow::Result<Self> {
        let path = dir.join(input_log_name(name, ts));
        let file = open_append(&path)?;
        let encoder: crate::logger::Encoder<InputEntry> = Box::new(|entry: &InputEntry| {
            let command = entry.command.trim();
            if command.is_empty() {
                return None;
            }
            let trimmed = InputEntry { command: command.to_owned(), timestamp: entry.timestamp };
            let mut line = serde_json::to_vec(&trimmed).ok()?;
            line.push(b'\n');
            Some(Bytes::from(line))
        });
        Ok(Self { inner: AsyncFileLogger::new(path, file, config, encoder) })
    }

    /// Record a command stamped with the current UTC time.
    pub async fn write(&self, command: &str) {
        self.inner.write(InputEntry::now(command)).await;
    }

    pub async fn write_entry(&self, entry: InputEntry) {
        self.inner.write(entry).await;
    }

    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn stats(&self) -> LoggerStats {
        self.inner.stats()
    }
}

/// One-line-per-event MCP notification log.
pub struct McpEventLogger {
    inner: AsyncFileLogger<String>,
}

impl McpEventLogger {
    /// Open `<dir>/Events-<sessionID>-<ts>` and start the writer.
    pub fn create(
        dir: &Path,
        session_id: &str,
        ts: &str,
        config: LoggerConfig,
    ) -> anyhow::Result<Self> {
        let path = dir.join(mcp_event_log_name(session_id, ts));
        let file = open_append(&path)?;
        let encoder: crate::logger::Encoder<String> = Box::new(|event: &String| {
            if event.trim().is_empty() {
                return None;
            }
            let mut line = event.clone().into_bytes();
            if !line.ends_with(b"\n") {
                line.push(b'\n');
            }
            Some(Bytes::from(line))
        });
        Ok(Self { inner: AsyncFileLogger::new(path, file, config, encoder) })
    }

    pub async fn write(&self, event: String) {
        self.inner.write(event).await;
    }

    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

#[cfg(test)]
#[path = "transcript_tests.rs"]
mod tests;
