// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager: owns the session map, enforces agent singletons, allocates
//! human-readable session ids, runs prompt injection, answers history
//! queries, and emits lifecycle events.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{AgentRegistry, SessionInterface};
use crate::error::TermError;
use crate::event::{AgentEvent, EventBuses, TerminalEvent};
use crate::factory::{FactoryConfig, SessionFactory, SessionSpec};
use crate::inject::{inject_prompts, InjectTiming, PromptRenderer};
use crate::mcp::TurnEvent;
use crate::pty::PtyFactory;
use crate::retain;
use crate::session::Session;
use crate::tail::{filtered_tail, TAIL_MAX_BYTES, TAIL_MAX_LINES};

/// Session ids never exceed this many bytes.
pub const MAX_SESSION_ID_LEN: usize = 128;
/// Attempts made to find a free id for one agent.
const MAX_ID_ATTEMPTS: u64 = 64;

/// Manager-level configuration.
pub struct ManagerConfig {
    pub factory: FactoryConfig,
    /// Session logs older than this many days are pruned (0 disables).
    pub retention_days: u32,
    /// Newest files per terminal kept regardless of age.
    pub retention_keep: usize,
    pub buses: EventBuses,
    pub inject_timing: InjectTiming,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            factory: FactoryConfig::default(),
            retention_days: 0,
            retention_keep: retain::DEFAULT_KEEP_NEWEST,
            buses: EventBuses::default(),
            inject_timing: InjectTiming::default(),
        }
    }
}

/// Options for creating an agent-backed session.
#[derive(Default)]
pub struct CreateOptions {
    pub interface: Option<SessionInterface>,
    pub title: Option<String>,
    pub role: Option<String>,
    /// Externally-supplied session id; validated and recorded.
    pub session_id: Option<String>,
    pub config_hash: Option<String>,
}

/// One page of a history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub lines: Vec<String>,
    /// Byte offset to pass back for the next (older) page; `None` at the
    /// start of the file.
    pub next_cursor: Option<u64>,
}

struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    /// Singleton holders: agent name → live terminal id.
    agent_sessions: HashMap<String, String>,
    /// Last allocated sequence per sanitized agent name.
    agent_sequence: HashMap<String, u64>,
}

pub struct Manager {
    factory: SessionFactory,
    registry: Arc<dyn AgentRegistry>,
    renderer: Option<Arc<dyn PromptRenderer>>,
    buses: EventBuses,
    inject_timing: InjectTiming,
    inner: RwLock<Inner>,
    shell_counter: AtomicU64,
    cancel: CancellationToken,
}

impl Manager {
    /// Build the manager and start the retention cleaner when configured.
    pub fn new(
        pty: Arc<dyn PtyFactory>,
        registry: Arc<dyn AgentRegistry>,
        renderer: Option<Arc<dyn PromptRenderer>>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        if let Some(dir) = &config.factory.session_log_dir {
            if config.retention_days > 0 {
                retain::spawn_cleaner(
                    dir.clone(),
                    config.retention_days,
                    config.retention_keep,
                    cancel.child_token(),
                );
            }
        }

        Arc::new(Self {
            factory: SessionFactory::new(pty, config.factory),
            registry,
            renderer,
            buses: config.buses,
            inject_timing: config.inject_timing,
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                agent_sessions: HashMap::new(),
                agent_sequence: HashMap::new(),
            }),
            shell_counter: AtomicU64::new(0),
            cancel,
        })
    }

    pub fn events(&self) -> &EventBuses {
        &self.buses
    }

    /// Create a session for a registered agent, enforcing the singleton
    /// policy and allocating a `"<name> <k>"` id.
    pub async fn create_agent_session(
        self: &Arc<Self>,
        agent_name: &str,
        opts: CreateOptions,
    ) -> anyhow::Result<Arc<Session>> {
        let profile = self
            .registry
            .get(agent_name)
            .ok_or_else(|| TermError::AgentNotFound(agent_name.to_owned()))?;
        let command_line = profile.shell.clone().ok_or_else(|| {
            TermError::InvalidRunner(format!("agent {agent_name} has no shell command"))
        })?;
        let sanitized = sanitize_session_name(&profile.name)?;
        let interface = opts.interface.unwrap_or(SessionInterface::Cli);

        // Reserve the singleton slot and the id before starting anything.
        let id = {
            let mut inner = self.inner.write();
            if profile.singleton {
                if let Some(terminal_id) = inner.agent_sessions.get(&profile.name) {
                    return Err(TermError::AgentAlreadyRunning {
                        agent: profile.name.clone(),
                        terminal_id: terminal_id.clone(),
                    }
                    .into());
                }
            }
            let id = match &opts.session_id {
                Some(explicit) => {
                    validate_session_id(explicit)?;
                    if inner.sessions.contains_key(explicit) {
                        return Err(TermError::InvalidSessionId(explicit.clone()).into());
                    }
                    if let Some(seq) = parse_session_sequence(explicit, &sanitized) {
                        let entry = inner.agent_sequence.entry(sanitized.clone()).or_insert(0);
                        *entry = (*entry).max(seq);
                    }
                    explicit.clone()
                }
                None => next_agent_id(&mut inner, &sanitized)?,
            };
            if profile.singleton {
                inner.agent_sessions.insert(profile.name.clone(), id.clone());
            }
            id
        };

        let spec = SessionSpec {
            id: id.clone(),
            title: opts.title.unwrap_or_else(|| profile.name.clone()),
            role: opts.role.unwrap_or_default(),
            command_line,
            agent: Some(profile.clone()),
            interface,
            config_hash: opts.config_hash,
        };

        let built = match self.factory.build(spec) {
            Ok(built) => built,
            Err(e) => {
                // Roll the reservation back so the agent can be retried.
                let mut inner = self.inner.write();
                if inner.agent_sessions.get(&profile.name) == Some(&id) {
                    inner.agent_sessions.remove(&profile.name);
                }
                return Err(e.context(format!("start agent {agent_name}")));
            }
        };
        let session = Arc::clone(&built.session);

        self.inner.write().sessions.insert(id.clone(), Arc::clone(&session));

        if let Some(mcp) = &built.mcp {
            let agent_tx = self.buses.agent_tx.clone();
            let agent = profile.name.clone();
            let terminal_id = id.clone();
            mcp.set_turn_handler(Arc::new(move |event: TurnEvent| {
                let _ = agent_tx.send(AgentEvent::AgentTurnComplete {
                    agent: agent.clone(),
                    terminal_id: terminal_id.clone(),
                    turn: event.turn,
                    thread_id: event.thread_id.clone(),
                    event_id: format!("gestalt-mcp:{terminal_id}:{}", event.turn),
                });
            }));
        }

        let _ = self.buses.terminal_tx.send(TerminalEvent::TerminalCreated {
            terminal_id: id.clone(),
            title: session.title().to_owned(),
            command: session.command().to_owned(),
        });
        let _ = self.buses.agent_tx.send(AgentEvent::AgentStarted {
            agent: profile.name.clone(),
            terminal_id: id.clone(),
        });

        self.spawn_close_watcher(Arc::clone(&session), Some(profile.name.clone()));

        if let Some(renderer) = &self.renderer {
            let renderer = Arc::clone(renderer);
            let inject_session = Arc::clone(&session);
            let timing = self.inject_timing.clone();
            tokio::spawn(async move {
                inject_prompts(&inject_session, &profile, renderer.as_ref(), &timing).await;
            });
        }

        debug!(terminal = %id, agent = %agent_name, "agent session created");
        Ok(session)
    }

    /// Create an unmanaged shell session with a numeric id.
    pub async fn create_shell_session(
        self: &Arc<Self>,
        command_line: &str,
    ) -> anyhow::Result<Arc<Session>> {
        let id = loop {
            let n = self.shell_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let candidate = n.to_string();
            if !self.inner.read().sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let built = self
            .factory
            .build(SessionSpec::shell(id.clone(), command_line))
            .context("start shell")?;
        let session = Arc::clone(&built.session);

        self.inner.write().sessions.insert(id.clone(), Arc::clone(&session));

        let _ = self.buses.terminal_tx.send(TerminalEvent::TerminalCreated {
            terminal_id: id.clone(),
            title: session.title().to_owned(),
            command: session.command().to_owned(),
        });
        self.spawn_close_watcher(Arc::clone(&session), None);

        debug!(terminal = %id, "shell session created");
        Ok(session)
    }

    pub fn get(&self, terminal_id: &str) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(terminal_id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> =
            self.inner.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        sessions
    }

    /// Terminal id currently held by a singleton agent.
    pub fn agent_terminal(&self, agent_name: &str) -> Option<String> {
        self.inner.read().agent_sessions.get(agent_name).cloned()
    }

    /// Close and forget a session.
    pub async fn delete_session(&self, terminal_id: &str) -> anyhow::Result<()> {
        let session = self
            .get(terminal_id)
            .ok_or_else(|| TermError::SessionNotFound(terminal_id.to_owned()))?;
        let result = session.close().await;
        if self.forget(&session) {
            self.emit_closed(&session, result.err().map(|e| e.to_string()));
        }
        Ok(())
    }

    /// Record a command into a session's history and type it.
    pub async fn send_input(&self, terminal_id: &str, command: &str) -> anyhow::Result<()> {
        let session = self
            .get(terminal_id)
            .ok_or_else(|| TermError::SessionNotFound(terminal_id.to_owned()))?;
        session.send_command(command).await?;
        Ok(())
    }

    /// Page backwards through a session's transcript.
    ///
    /// The live in-memory lines are merged onto the file tail with the
    /// largest exact suffix/prefix overlap removed. For sessions already
    /// gone, the query falls back to the newest matching log file on disk.
    pub fn history(
        &self,
        terminal_id: &str,
        max_lines: usize,
        cursor: Option<u64>,
    ) -> anyhow::Result<HistoryPage> {
        // The live buffer is only merged onto the newest page; older pages
        // are pure file reads.
        let (log_path, memory_lines) = match self.get(terminal_id) {
            Some(session) => (
                session.log_path().map(Path::to_path_buf),
                if cursor.is_none() { session.history_lines(max_lines) } else { vec![] },
            ),
            None => {
                let dir = self
                    .factory
                    .config()
                    .session_log_dir
                    .as_ref()
                    .ok_or_else(|| TermError::SessionNotFound(terminal_id.to_owned()))?;
                let newest = retain::scan_log_dir(dir)
                    .into_iter()
                    .filter(|f| f.terminal_id == terminal_id)
                    .max_by_key(|f| f.mod_time)
                    .ok_or_else(|| TermError::SessionNotFound(terminal_id.to_owned()))?;
                (Some(newest.path), vec![])
            }
        };

        let (file_lines, next_cursor) = match &log_path {
            Some(path) if path.exists() => read_lines_before(path, cursor, max_lines)?,
            _ => (vec![], None),
        };

        let mut lines = merge_overlap(file_lines, memory_lines);
        if lines.len() > max_lines {
            let skip = lines.len() - max_lines;
            lines.drain(..skip);
        }
        Ok(HistoryPage { lines, next_cursor })
    }

    /// Close every session and stop background tasks.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> =
            self.inner.read().sessions.values().cloned().collect();
        for session in sessions {
            let result = session.close().await;
            if let Err(e) = &result {
                warn!(terminal = %session.id(), "close failed during shutdown: {e}");
            }
            if self.forget(&session) {
                self.emit_closed(&session, result.err().map(|e| e.to_string()));
            }
        }
        self.cancel.cancel();
    }

    /// Watch for a session closing on its own (child exit, read error) and
    /// release the maps + emit events when it does.
    fn spawn_close_watcher(self: &Arc<Self>, session: Arc<Session>, agent: Option<String>) {
        let manager = Arc::downgrade(self);
        let closed = session.closed_token();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = cancel.cancelled() => return,
            }
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if manager.forget(&session) {
                let error = session.close().await.err().map(|e| e.to_string());
                manager.emit_closed(&session, error);
                debug!(terminal = %session.id(), agent = ?agent, "session reaped");
            }
        });
    }

    /// Drop the session from both maps. Returns false when another path
    /// already removed it (events were emitted there).
    fn forget(&self, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(session.id()).is_some();
        if let Some(agent) = session.agent_id() {
            if inner.agent_sessions.get(agent).map(String::as_str) == Some(session.id()) {
                inner.agent_sessions.remove(agent);
            }
        }
        removed
    }

    /// Emit closed (and, first, error) events for a finished session.
    fn emit_closed(&self, session: &Arc<Session>, error: Option<String>) {
        let terminal_id = session.id().to_owned();
        if let Some(error) = error {
            let tail =
                filtered_tail(&session.history_lines(TAIL_MAX_LINES), TAIL_MAX_LINES, TAIL_MAX_BYTES);
            let _ = self.buses.terminal_tx.send(TerminalEvent::TerminalError {
                terminal_id: terminal_id.clone(),
                error: error.clone(),
                output_tail: tail.clone(),
            });
            if let Some(agent) = session.agent_id() {
                let _ = self.buses.agent_tx.send(AgentEvent::AgentError {
                    agent: agent.to_owned(),
                    terminal_id: terminal_id.clone(),
                    error,
                    output_tail: tail,
                });
            }
        }
        let _ = self
            .buses
            .terminal_tx
            .send(TerminalEvent::TerminalClosed { terminal_id: terminal_id.clone() });
        if let Some(agent) = session.agent_id() {
            let _ = self.buses.agent_tx.send(AgentEvent::AgentStopped {
                agent: agent.to_owned(),
                terminal_id,
            });
        }
    }
}

/// Strip separators and control characters from an agent name; the result
/// is the id prefix.
pub fn sanitize_session_name(name: &str) -> Result<String, TermError> {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && !c.is_control())
        .collect();
    let cleaned = cleaned.trim().to_owned();
    if cleaned.is_empty() {
        return Err(TermError::EmptyAgentName);
    }
    Ok(cleaned)
}

/// Validate an externally-supplied session id.
pub fn validate_session_id(id: &str) -> Result<(), TermError> {
    if id.trim().is_empty()
        || id.len() > MAX_SESSION_ID_LEN
        || id.chars().any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(TermError::InvalidSessionId(id.to_owned()));
    }
    Ok(())
}

/// Parse `"<prefix> <k>"` back into `k`.
fn parse_session_sequence(id: &str, prefix: &str) -> Option<u64> {
    let rest = id.strip_prefix(prefix)?.strip_prefix(' ')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Allocate the next `"<name> <k>"` id, advancing the stored sequence past
/// anything already observed in the session map.
fn next_agent_id(inner: &mut Inner, sanitized: &str) -> Result<String, TermError> {
    let mut seq = inner.agent_sequence.get(sanitized).copied().unwrap_or(0);
    for id in inner.sessions.keys() {
        if let Some(k) = parse_session_sequence(id, sanitized) {
            seq = seq.max(k);
        }
    }

    for attempt in 0..MAX_ID_ATTEMPTS {
        let candidate_seq = seq + 1 + attempt;
        let candidate = format!("{sanitized} {candidate_seq}");
        if candidate.len() > MAX_SESSION_ID_LEN {
            return Err(TermError::InvalidSessionId(candidate));
        }
        if !inner.sessions.contains_key(&candidate) {
            inner.agent_sequence.insert(sanitized.to_owned(), candidate_seq);
            return Ok(candidate);
        }
    }
    Err(TermError::InvalidSessionId(format!("{sanitized}: no free id")))
}

/// Read up to `max_lines` complete lines ending at byte offset `cursor`
/// (file end when `None`). Returns the lines and the offset where the page
/// begins, for use as the next cursor.
pub fn read_lines_before(
    path: &Path,
    cursor: Option<u64>,
    max_lines: usize,
) -> anyhow::Result<(Vec<String>, Option<u64>)> {
    let contents = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let end = cursor.map(|c| (c as usize).min(contents.len())).unwrap_or(contents.len());
    if end == 0 || max_lines == 0 {
        return Ok((vec![], None));
    }
    let slice = &contents[..end];
    // A trailing newline terminates the last line rather than opening an
    // empty one.
    let content_end = if slice.ends_with(b"\n") { end - 1 } else { end };

    // Walk backwards collecting (start, end) per line, newest first.
    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut line_end = content_end;
    loop {
        let mut line_start = line_end;
        while line_start > 0 && slice[line_start - 1] != b'\n' {
            line_start -= 1;
        }
        bounds.push((line_start, line_end));
        if bounds.len() >= max_lines || line_start == 0 {
            break;
        }
        line_end = line_start - 1;
    }
    bounds.reverse();

    let lines = bounds
        .iter()
        .map(|&(start, stop)| String::from_utf8_lossy(&slice[start..stop]).into_owned())
        .collect();
    let next_cursor = match bounds.first() {
        Some(&(0, _)) | None => None,
        Some(&(start, _)) => Some(start as u64),
    };
    Ok((lines, next_cursor))
}

/// Merge file lines (older) with in-memory lines (newer), removing the
/// largest exact suffix/prefix overlap.
pub fn merge_overlap(file_lines: Vec<String>, memory_lines: Vec<String>) -> Vec<String> {
    let max_overlap = file_lines.len().min(memory_lines.len());
    let mut overlap = 0;
    for k in (1..=max_overlap).rev() {
        if file_lines[file_lines.len() - k..] == memory_lines[..k] {
            overlap = k;
            break;
        }
    }
    let mut merged = file_lines;
    merged.extend(memory_lines.into_iter().skip(overlap));
    merged
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
