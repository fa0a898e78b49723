// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session: one child program, its stream, and the three cooperating loops
//! (read, write, broadcast) that move bytes between the PTY, the filter
//! chain, the transcript, and subscribers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcast::{Broadcaster, Subscription};
use crate::error::{join_errors, TermError};
use crate::filter::FilterChain;
use crate::history::InputBuffer;
use crate::publish::{OutputPublisher, PublishPolicy, PublishTargets};
use crate::pty::{ProcessHandle, PtyReader, PtyStream, PtyWriter};
use crate::transcript::{InputLogger, SessionLogger};

/// Read-loop chunk size.
const READ_BUF_SIZE: usize = 4096;
/// Depth of the input and output channels.
const CHANNEL_CAPACITY: usize = 256;
/// Input-history entries kept in memory.
const INPUT_HISTORY_ENTRIES: usize = 256;

/// Monotone session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Aggregated teardown failure; cloned out of the close cache so every
/// caller observes the same value.
#[derive(Debug, Clone)]
pub struct CloseError(Arc<anyhow::Error>);

impl std::fmt::Display for CloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for CloseError {}

/// Identity and wiring for a new session.
pub struct SessionConfig {
    pub id: String,
    pub title: String,
    pub role: String,
    pub agent_id: Option<String>,
    pub command: String,
    pub config_hash: Option<String>,
    pub buffer_lines: usize,
    pub publish_policy: PublishPolicy,
    pub chain: FilterChain,
    pub logger: Option<Arc<SessionLogger>>,
    pub raw_logger: Option<Arc<SessionLogger>>,
    pub input_logger: Option<Arc<InputLogger>>,
}

impl SessionConfig {
    /// Minimal config for tests and ad-hoc shells.
    pub fn bare(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            role: String::new(),
            agent_id: None,
            command: command.into(),
            config_hash: None,
            buffer_lines: 1000,
            publish_policy: PublishPolicy::DropOldest,
            chain: FilterChain::default(),
            logger: None,
            raw_logger: None,
            input_logger: None,
        }
    }
}

/// One managed terminal session.
pub struct Session {
    id: String,
    title: String,
    role: String,
    created_at: DateTime<Utc>,
    agent_id: Option<String>,
    command: String,
    config_hash: Option<String>,

    state: AtomicU8,
    cancel: CancellationToken,
    /// Fires once teardown has fully completed.
    closed: CancellationToken,

    input_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    broadcaster: Arc<Broadcaster>,
    publisher: Arc<OutputPublisher>,
    chain: Arc<Mutex<FilterChain>>,
    input_buffer: InputBuffer,
    input_logger: Option<Arc<InputLogger>>,
    log_path: Option<PathBuf>,

    stream: Box<dyn PtyStream>,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    close_result: tokio::sync::OnceCell<Result<(), CloseError>>,
}

impl Session {
    /// Split the stream, wire the publisher, and start the loops.
    pub fn start(
        config: SessionConfig,
        stream: Box<dyn PtyStream>,
        process: Option<Box<dyn ProcessHandle>>,
    ) -> anyhow::Result<Arc<Self>> {
        let (reader, writer) = match stream.split() {
            Ok(halves) => halves,
            Err(e) => {
                // No session will ever own this child; kill and reap it
                // before surfacing the error.
                drop(crate::pty::SpawnGuard::new(stream, process));
                return Err(e);
            }
        };
        let cancel = CancellationToken::new();
        let broadcaster = Broadcaster::new(config.buffer_lines);

        let publisher = Arc::new(OutputPublisher::new(
            config.publish_policy,
            PublishTargets {
                logger: config.logger.clone(),
                buffer: None,
                bus: Some(Arc::clone(&broadcaster)),
            },
            cancel.clone(),
        ));

        let (input_tx, input_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        let log_path = config.logger.as_ref().map(|l| l.path().to_path_buf());
        let chain = Arc::new(Mutex::new(config.chain));

        let session = Arc::new(Self {
            id: config.id,
            title: config.title,
            role: config.role,
            created_at: Utc::now(),
            agent_id: config.agent_id,
            command: config.command,
            config_hash: config.config_hash,
            state: AtomicU8::new(SessionState::Starting as u8),
            cancel: cancel.clone(),
            closed: CancellationToken::new(),
            input_tx: Mutex::new(Some(input_tx)),
            broadcaster,
            publisher: Arc::clone(&publisher),
            chain: Arc::clone(&chain),
            input_buffer: InputBuffer::new(INPUT_HISTORY_ENTRIES),
            input_logger: config.input_logger,
            log_path,
            stream,
            process: Mutex::new(process),
            loops: Mutex::new(Vec::new()),
            close_result: tokio::sync::OnceCell::new(),
        });

        let read_handle = tokio::spawn(read_loop(
            reader,
            output_tx,
            cancel.clone(),
            Arc::downgrade(&session),
        ));
        let write_handle =
            tokio::spawn(write_loop(writer, input_rx, Arc::downgrade(&session)));
        let broadcast_handle = tokio::spawn(broadcast_loop(
            output_rx,
            chain,
            config.raw_logger,
            publisher,
        ));
        {
            let mut loops = session.loops.lock();
            loops.push(read_handle);
            loops.push(write_handle);
            loops.push(broadcast_handle);
        }

        session.state.store(SessionState::Running as u8, Ordering::Release);
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn config_hash(&self) -> Option<&str> {
        self.config_hash.as_deref()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.log_path.as_deref()
    }

    /// Token that fires after the session has fully closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Enqueue raw bytes for the child. Returns [`TermError::SessionClosed`]
    /// once the session is closing, closed, or cancelled.
    pub async fn write(&self, data: Bytes) -> Result<(), TermError> {
        if self.state() >= SessionState::Closing {
            return Err(TermError::SessionClosed);
        }
        let Some(tx) = self.input_tx.lock().clone() else {
            return Err(TermError::SessionClosed);
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TermError::SessionClosed),
            sent = tx.send(data) => sent.map_err(|_| TermError::SessionClosed),
        }
    }

    /// Record a command in the input history, then send it with a trailing
    /// carriage return.
    pub async fn send_command(&self, command: &str) -> Result<(), TermError> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        self.input_buffer.append(trimmed);
        if let Some(logger) = &self.input_logger {
            logger.write(trimmed).await;
        }
        let mut payload = trimmed.as_bytes().to_vec();
        payload.push(b'\r');
        self.write(Bytes::from(payload)).await
    }

    /// Recent input history entries.
    pub fn input_history(&self, max: usize) -> Vec<crate::history::InputEntry> {
        self.input_buffer.recent(max)
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Resize the PTY and every stateful filter in the chain.
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.chain.lock().resize(cols, rows);
        self.stream.resize(cols, rows)
    }

    /// Per-filter byte counters for the session's chain.
    pub fn filter_stats(&self) -> Vec<crate::filter::FilterStats> {
        self.chain.lock().stats()
    }

    pub fn publisher_dropped(&self) -> u64 {
        self.publisher.dropped()
    }

    /// Most recent `max` lines from the live buffer, falling back to the
    /// session log file when the buffer is empty.
    pub fn history_lines(&self, max: usize) -> Vec<String> {
        if !self.broadcaster.buffer_is_empty() {
            return self.broadcaster.recent_lines(max);
        }
        let Some(path) = &self.log_path else {
            return vec![];
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return vec![];
        };
        let lines: Vec<String> = contents.lines().map(str::to_owned).collect();
        let skip = lines.len().saturating_sub(max);
        lines[skip..].to_vec()
    }

    /// Tear the session down exactly once; always returns the same result.
    ///
    /// Order: cancel, close input, close PTY, kill + reap the child, join
    /// loops (which closes publisher, bus, and transcript), close the input
    /// logger. Errors are collected and joined, never short-circuited.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.close_result
            .get_or_init(|| async {
                self.state.store(SessionState::Closing as u8, Ordering::Release);
                debug!(id = %self.id, "closing session");
                let mut errors: Vec<anyhow::Error> = Vec::new();

                self.cancel.cancel();
                self.input_tx.lock().take();

                if let Err(e) = self.stream.shutdown() {
                    errors.push(e.context("close pty"));
                }

                let process = self.process.lock().take();
                if let Some(mut process) = process {
                    if process.is_alive() {
                        if let Err(e) = process.kill() {
                            errors.push(e.context("kill child"));
                        }
                    }
                    if let Err(e) = process.wait().await {
                        errors.push(e.context("wait child"));
                    }
                }

                let handles: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
                for handle in handles {
                    if handle.await.is_err() {
                        errors.push(anyhow::anyhow!("session loop panicked"));
                    }
                }

                if let Some(logger) = &self.input_logger {
                    logger.close().await;
                }

                self.state.store(SessionState::Closed as u8, Ordering::Release);
                self.closed.cancel();
                debug!(id = %self.id, "session closed");

                match join_errors(errors) {
                    None => Ok(()),
                    Some(e) => Err(CloseError(Arc::new(e))),
                }
            })
            .await
            .clone()
    }
}

/// Read loop: PTY → output channel. Any error or EOF funnels into close.
async fn read_loop(
    mut reader: Box<dyn PtyReader>,
    output_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    session: Weak<Session>,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if output_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("session read error: {e}");
                    break;
                }
            },
        }
    }
    drop(output_tx);
    if let Some(session) = session.upgrade() {
        tokio::spawn(async move {
            let _ = session.close().await;
        });
    }
}

/// Write loop: input channel → PTY.
async fn write_loop(
    mut writer: Box<dyn PtyWriter>,
    mut input_rx: mpsc::Receiver<Bytes>,
    session: Weak<Session>,
) {
    while let Some(data) = input_rx.recv().await {
        if let Err(e) = writer.write(&data).await {
            warn!("session write error: {e}");
            if let Some(session) = session.upgrade() {
                tokio::spawn(async move {
                    let _ = session.close().await;
                });
            }
            return;
        }
    }
}

/// Broadcast loop: output channel → raw log → filter chain → publisher.
async fn broadcast_loop(
    mut output_rx: mpsc::Receiver<Bytes>,
    chain: Arc<Mutex<FilterChain>>,
    raw_logger: Option<Arc<SessionLogger>>,
    publisher: Arc<OutputPublisher>,
) {
    while let Some(chunk) = output_rx.recv().await {
        if let Some(raw) = &raw_logger {
            raw.write(chunk.clone()).await;
        }
        let data = chain.lock().write(&chunk);
        if !data.is_empty() {
            publisher.publish(Bytes::from(data)).await;
        }
    }

    let tail = chain.lock().flush();
    if !tail.is_empty() {
        publisher.publish(Bytes::from(tail)).await;
    }
    publisher.close().await;
    if let Some(raw) = &raw_logger {
        raw.close().await;
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
