// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt injection: after an agent CLI comes up, render its prompt and
//! skill templates and type them into the session with deliberate pacing so
//! TUIs ingest them reliably.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error};

use crate::agent::AgentProfile;
use crate::session::Session;

/// External template renderer.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, name: &str, profile: &AgentProfile) -> anyhow::Result<String>;
}

/// Pacing contract for injection.
#[derive(Debug, Clone)]
pub struct InjectTiming {
    pub chunk_size: usize,
    pub inter_chunk: Duration,
    pub inter_prompt: Duration,
    pub before_enter: Duration,
    pub enter_gap: Duration,
    pub on_air_timeout: Duration,
}

impl Default for InjectTiming {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            inter_chunk: Duration::from_millis(25),
            inter_prompt: Duration::from_millis(100),
            before_enter: Duration::from_millis(500),
            enter_gap: Duration::from_millis(75),
            on_air_timeout: Duration::from_secs(5),
        }
    }
}

/// Inject the profile's prompts and skills into the session.
///
/// Skipped entirely for profiles with nothing to inject that are not codex.
/// Waits for the on-air marker when configured; a timeout is logged and
/// injection proceeds anyway. Write errors abort the remainder.
pub async fn inject_prompts(
    session: &Arc<Session>,
    profile: &AgentProfile,
    renderer: &dyn PromptRenderer,
    timing: &InjectTiming,
) {
    if profile.prompts.is_empty() && profile.skills.is_empty() && !profile.is_cli_type("codex") {
        return;
    }

    if let Some(marker) = &profile.on_air_string {
        if !wait_for_line(session, marker, timing.on_air_timeout).await {
            error!(
                agent = %profile.name,
                terminal = %session.id(),
                marker = %marker,
                "on-air marker not seen before timeout, injecting anyway"
            );
        }
    }

    let names = profile.prompts.iter().chain(profile.skills.iter());
    for name in names {
        let rendered = match renderer.render(name, profile) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(agent = %profile.name, prompt = %name, "prompt render failed: {e:#}");
                return;
            }
        };
        if let Err(e) = write_chunked(session, rendered.as_bytes(), timing).await {
            error!(agent = %profile.name, prompt = %name, "prompt write failed: {e}");
            return;
        }
        tokio::time::sleep(timing.inter_prompt).await;
    }

    // Commit with Enter, split so slow TUIs register the keypress.
    tokio::time::sleep(timing.before_enter).await;
    if session.write(Bytes::from_static(b"\r")).await.is_err() {
        return;
    }
    tokio::time::sleep(timing.enter_gap).await;
    let _ = session.write(Bytes::from_static(b"\n")).await;
    debug!(agent = %profile.name, terminal = %session.id(), "prompt injection complete");
}

async fn write_chunked(
    session: &Arc<Session>,
    data: &[u8],
    timing: &InjectTiming,
) -> Result<(), crate::error::TermError> {
    let mut first = true;
    for chunk in data.chunks(timing.chunk_size.max(1)) {
        if !first {
            tokio::time::sleep(timing.inter_chunk).await;
        }
        first = false;
        session.write(Bytes::copy_from_slice(chunk)).await?;
    }
    Ok(())
}

/// Wait until the session prints a line equal to `marker` (trimmed,
/// case-insensitive). Checks already-buffered output first.
async fn wait_for_line(session: &Arc<Session>, marker: &str, timeout: Duration) -> bool {
    let matches = |line: &str| line.trim().eq_ignore_ascii_case(marker.trim());

    let mut sub = session.subscribe();
    if session.history_lines(200).iter().any(|l| matches(l)) {
        return true;
    }

    let waited = tokio::time::timeout(timeout, async move {
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let Some(chunk) = sub.recv().await else {
                return false;
            };
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if matches(&String::from_utf8_lossy(&line)) {
                    return true;
                }
            }
        }
    })
    .await;
    waited.unwrap_or(false)
}

#[cfg(test)]
#[path = "inject_tests.rs"]
mod tests;
