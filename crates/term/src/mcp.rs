// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP adapter: bridges a line-delimited JSON-RPC tool server behind the
//! same PTY-shaped surface the session loops consume.
//!
//! Writes are assembled into commands (committed on `\r` or `\n`) and turned
//! into `tools/call` requests; server notifications and tool replies are
//! rendered as terminal-style lines on the synthesized read side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pty::{PtyReader, PtyStream, PtyWriter, StreamKind};
use crate::transcript::McpEventLogger;

/// JSON-RPC protocol version the server is initialized with.
const PROTOCOL_VERSION: &str = "2024-11-05";
/// Notification lines are capped at this many runes.
const NOTIFY_MAX_RUNES: usize = 512;
/// Synthesized output channel depth.
const OUT_CAPACITY: usize = 256;
/// Command queue depth.
const CMD_CAPACITY: usize = 64;

/// Fired after each successful `tools/call` reply.
#[derive(Debug, Clone)]
pub struct TurnEvent {
    pub turn: u64,
    pub thread_id: Option<String>,
    pub tool: String,
}

pub type TurnHandler = Arc<dyn Fn(TurnEvent) + Send + Sync>;

/// Adapter configuration.
pub struct McpConfig {
    pub client_name: String,
    pub init_timeout: Duration,
    pub event_logger: Option<Arc<McpEventLogger>>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            client_name: "gestalt".to_owned(),
            init_timeout: Duration::from_secs(10),
            event_logger: None,
        }
    }
}

enum RpcReply {
    Result(Value),
    Error(String),
}

struct Inner {
    cancel: CancellationToken,
    out_tx: mpsc::Sender<Bytes>,
    writer: tokio::sync::Mutex<Box<dyn PtyWriter>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcReply>>>,
    next_id: AtomicU64,
    init: OnceCell<()>,
    init_timeout: Duration,
    client_name: String,
    thread_id: Mutex<Option<String>>,
    turn: AtomicU64,
    turn_handler: Mutex<Option<TurnHandler>>,
    event_logger: Option<Arc<McpEventLogger>>,
}

impl Inner {
    /// Write one JSON message as a newline-terminated frame.
    async fn send_frame(&self, message: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(message).context("encode frame")?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write(&line).await.context("write frame")?;
        Ok(())
    }

    /// Send a request and await the matching response.
    async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = self.send_frame(&frame).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let reply = tokio::select! {
            reply = rx => reply.ok(),
            _ = self.cancel.cancelled() => None,
        };
        match reply {
            Some(RpcReply::Result(value)) => Ok(value),
            Some(RpcReply::Error(message)) => anyhow::bail!("{message}"),
            None => anyhow::bail!("mcp stream closed"),
        }
    }

    /// Perform `initialize` + `initialized` exactly once.
    async fn ensure_initialized(&self) -> anyhow::Result<()> {
        self.init
            .get_or_try_init(|| async {
                let params = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": self.client_name,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                });
                let init = self.request("initialize", params);
                tokio::time::timeout(self.init_timeout, init)
                    .await
                    .context("initialize timed out")??;
                self.send_frame(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/initialized",
                    "params": {},
                }))
                .await?;
                debug!("mcp session initialized");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Push synthesized text onto the read pipe, normalizing bare `\n` to
    /// `\r\n` so it renders like PTY output.
    async fn push_output(&self, text: &str) {
        let normalized = text.replace("\r\n", "\n").replace('\n', "\r\n");
        let _ = self.out_tx.send(Bytes::from(normalized.into_bytes())).await;
    }

    fn route_reply(&self, id: u64, reply: RpcReply) {
        if let Some(tx) = self.pending.lock().remove(&id) {
            let _ = tx.send(reply);
        } else {
            debug!(id, "mcp response with no pending request");
        }
    }
}

/// PTY-shaped wrapper over an MCP tool server's raw stream.
pub struct McpAdapter {
    inner: Arc<Inner>,
    underlying: Box<dyn PtyStream>,
    synth: Mutex<Option<(Box<dyn PtyReader>, Box<dyn PtyWriter>)>>,
}

impl McpAdapter {
    /// Wrap `stream`, spawning the reader and command-loop tasks.
    pub fn new(stream: Box<dyn PtyStream>, config: McpConfig) -> anyhow::Result<Self> {
        let (raw_reader, raw_writer) = stream.split().context("split mcp stream")?;
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(OUT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CAPACITY);

        let inner = Arc::new(Inner {
            cancel: cancel.clone(),
            out_tx,
            writer: tokio::sync::Mutex::new(raw_writer),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            init: OnceCell::new(),
            init_timeout: config.init_timeout,
            client_name: config.client_name,
            thread_id: Mutex::new(None),
            turn: AtomicU64::new(0),
            turn_handler: Mutex::new(None),
            event_logger: config.event_logger,
        });

        tokio::spawn(run_reader(Arc::clone(&inner), raw_reader));
        tokio::spawn(run_commands(Arc::clone(&inner), cmd_rx));

        let read_half = Box::new(McpReadHalf { rx: out_rx, leftover: Bytes::new() });
        let write_half =
            Box::new(McpWriteHalf { buf: Vec::new(), last_was_cr: false, cmd_tx });

        Ok(Self {
            inner,
            underlying: stream,
            synth: Mutex::new(Some((read_half, write_half))),
        })
    }

    /// Install the handler invoked after each completed turn.
    pub fn set_turn_handler(&self, handler: TurnHandler) {
        *self.inner.turn_handler.lock() = Some(handler);
    }

    /// Initialize the server now, failing after `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        tokio::time::timeout(timeout, self.inner.ensure_initialized())
            .await
            .context("mcp ready wait timed out")?
    }

    pub fn turns(&self) -> u64 {
        self.inner.turn.load(Ordering::Relaxed)
    }

    pub fn thread_id(&self) -> Option<String> {
        self.inner.thread_id.lock().clone()
    }
}

impl PtyStream for McpAdapter {
    fn split(&self) -> anyhow::Result<(Box<dyn PtyReader>, Box<dyn PtyWriter>)> {
        self.synth.lock().take().context("mcp adapter already split")
    }

    fn resize(&self, _cols: u16, _rows: u16) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        self.inner.cancel.cancel();
        self.underlying.shutdown()
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Mcp
    }
}

struct McpReadHalf {
    rx: mpsc::Receiver<Bytes>,
    leftover: Bytes,
}

impl PtyReader for McpReadHalf {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, std::io::Result<usize>> {
        Box::pin(async move {
            if self.leftover.is_empty() {
                match self.rx.recv().await {
                    Some(chunk) => self.leftover = chunk,
                    None => return Ok(0),
                }
            }
            let n = self.leftover.len().min(buf.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover = self.leftover.slice(n..);
            Ok(n)
        })
    }
}

struct McpWriteHalf {
    buf: Vec<u8>,
    last_was_cr: bool,
    cmd_tx: mpsc::Sender<String>,
}

impl McpWriteHalf {
    async fn commit(&mut self) -> std::io::Result<()> {
        let raw = std::mem::take(&mut self.buf);
        let command = String::from_utf8_lossy(&raw).trim().to_owned();
        if command.is_empty() {
            return Ok(());
        }
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mcp closed"))
    }
}

impl PtyWriter for McpWriteHalf {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            for &byte in data {
                if self.last_was_cr && byte == b'\n' {
                    // `\r\n` is one terminator.
                    self.last_was_cr = false;
                    continue;
                }
                self.last_was_cr = byte == b'\r';
                match byte {
                    b'\r' | b'\n' => self.commit().await?,
                    _ => self.buf.push(byte),
                }
            }
            Ok(())
        })
    }
}

/// Reader task: split the raw stream into JSON lines and dispatch them.
async fn run_reader(inner: Arc<Inner>, mut reader: Box<dyn PtyReader>) {
    let mut buf = vec![0u8; 4096];
    let mut pending_line: Vec<u8> = Vec::new();

    loop {
        let n = tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("mcp reader error: {e}");
                    break;
                }
            },
            _ = inner.cancel.cancelled() => break,
        };

        let mut rest = &buf[..n];
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            pending_line.extend_from_slice(&rest[..pos]);
            let line = std::mem::take(&mut pending_line);
            dispatch_line(&inner, &line).await;
            rest = &rest[pos + 1..];
        }
        pending_line.extend_from_slice(rest);
    }

    // Unblock every in-flight request.
    inner.pending.lock().clear();
}

async fn dispatch_line(inner: &Arc<Inner>, line: &[u8]) {
    let trimmed: &[u8] = {
        let mut l = line;
        while l.last() == Some(&b'\r') {
            l = &l[..l.len() - 1];
        }
        l
    };
    if trimmed.is_empty() {
        return;
    }

    let message: Value = match serde_json::from_slice(trimmed) {
        Ok(v) => v,
        Err(e) => {
            warn!("mcp: unparsable frame: {e}");
            inner.push_output(&format!("! error: invalid frame: {e}\n")).await;
            return;
        }
    };

    if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let line = format_notification(method, &params);
        if let Some(logger) = &inner.event_logger {
            logger.write(line.clone()).await;
        }
        inner.push_output(&line).await;
        return;
    }

    let Some(id) = parse_id(&message) else {
        debug!("mcp: response without usable id");
        return;
    };
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        inner.route_reply(id, RpcReply::Error(text));
    } else {
        let result = message.get("result").cloned().unwrap_or(Value::Null);
        inner.route_reply(id, RpcReply::Result(result));
    }
}

/// Accept numeric ids and numeric strings.
fn parse_id(message: &Value) -> Option<u64> {
    match message.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// `[mcp <method>] <suffix>` with the codex message text when extractable,
/// otherwise compact params JSON. Truncated to 512 runes, newline-terminated.
fn format_notification(method: &str, params: &Value) -> String {
    let suffix = extract_message_text(params)
        .unwrap_or_else(|| serde_json::to_string(params).unwrap_or_default());
    let mut line = format!("[mcp {method}] {suffix}");
    if line.chars().count() > NOTIFY_MAX_RUNES {
        line = line.chars().take(NOTIFY_MAX_RUNES).collect();
    }
    line.push('\n');
    line
}

/// Pull the human-readable text out of a codex event whose type is a
/// message variant.
fn extract_message_text(params: &Value) -> Option<String> {
    let msg = params.get("msg")?;
    let kind = msg.get("type")?.as_str()?;
    if !kind.contains("message") {
        return None;
    }
    msg.get("message").and_then(|m| m.as_str()).map(str::to_owned)
}

/// Command loop: one `tools/call` per committed command line.
async fn run_commands(inner: Arc<Inner>, mut cmd_rx: mpsc::Receiver<String>) {
    loop {
        let command = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
            _ = inner.cancel.cancelled() => break,
        };

        if let Err(e) = run_one_command(&inner, &command).await {
            warn!("mcp command failed: {e:#}");
            inner.push_output(&format!("! error: {e}\n")).await;
        }
    }
}

async fn run_one_command(inner: &Arc<Inner>, command: &str) -> anyhow::Result<()> {
    inner.ensure_initialized().await?;

    let thread_id = inner.thread_id.lock().clone();
    let (tool, arguments) = match &thread_id {
        None => ("codex", json!({ "prompt": command })),
        Some(thread) => ("codex-reply", json!({ "prompt": command, "threadId": thread })),
    };

    let result = inner
        .request("tools/call", json!({ "name": tool, "arguments": arguments }))
        .await?;

    if let Some(thread) = extract_thread_id(&result) {
        *inner.thread_id.lock() = Some(thread);
    }

    let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
    let text = extract_content_text(&result).unwrap_or_default();
    if is_error {
        let detail = if text.is_empty() { "tool call failed".to_owned() } else { text };
        inner.push_output(&format!("! error: {detail}\n")).await;
        return Ok(());
    }

    if !text.is_empty() {
        let mut rendered = text;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        inner.push_output(&rendered).await;
    }

    let turn = inner.turn.fetch_add(1, Ordering::Relaxed) + 1;
    let handler = inner.turn_handler.lock().clone();
    if let Some(handler) = handler {
        handler(TurnEvent {
            turn,
            thread_id: inner.thread_id.lock().clone(),
            tool: tool.to_owned(),
        });
    }
    Ok(())
}

/// Content shape: a plain string, or an array of `{text}` / `{content}`
/// items, or nested under `structuredContent`.
fn extract_content_text(result: &Value) -> Option<String> {
    if let Some(content) = result.get("content") {
        if let Some(text) = content_value_text(content) {
            return Some(text);
        }
    }
    result
        .get("structuredContent")
        .and_then(|s| s.get("content"))
        .and_then(content_value_text)
}

fn content_value_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    item.get("text")
                        .or_else(|| item.get("content"))
                        .and_then(|t| t.as_str())
                        .map(str::to_owned)
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

fn extract_thread_id(result: &Value) -> Option<String> {
    result
        .get("threadId")
        .and_then(|t| t.as_str())
        .map(str::to_owned)
        .or_else(|| {
            result
                .get("structuredContent")
                .and_then(|s| s.get("threadId"))
                .and_then(|t| t.as_str())
                .map(str::to_owned)
        })
}

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod tests;
