// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External-collaborator seam for pseudo-terminals.
//!
//! The core only needs a bidirectional byte stream with resize plus an
//! optional child-process handle; everything is object-safe so alternative
//! backends (and the MCP adapter) can stand in for a real PTY.

pub mod spawn;

use futures_util::future::BoxFuture;

/// What kind of stream a [`PtyStream`] actually is. The factory uses this to
/// pick publisher policies (the MCP adapter must never drop chunks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Pty,
    Mcp,
}

/// Read half of a stream. 4 KiB chunked reads; `Ok(0)` means EOF.
pub trait PtyReader: Send + 'static {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, std::io::Result<usize>>;
}

/// Write half of a stream.
pub trait PtyWriter: Send + 'static {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>>;
}

/// A bidirectional byte stream attached to one session.
pub trait PtyStream: Send + Sync + 'static {
    /// Take the reader/writer halves. Valid exactly once.
    fn split(&self) -> anyhow::Result<(Box<dyn PtyReader>, Box<dyn PtyWriter>)>;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    /// Release the stream's file handle. Idempotent; closing an
    /// already-closed stream is not an error.
    fn shutdown(&self) -> anyhow::Result<()>;

    fn kind(&self) -> StreamKind {
        StreamKind::Pty
    }
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Handle on the child program behind a stream.
pub trait ProcessHandle: Send + 'static {
    fn is_alive(&mut self) -> bool;

    /// Forcefully terminate the child. Already-exited children are not an
    /// error.
    fn kill(&mut self) -> anyhow::Result<()>;

    /// Reap the child and return its exit status.
    fn wait(&mut self) -> BoxFuture<'_, anyhow::Result<ExitStatus>>;
}

/// Launches child programs on fresh streams.
pub trait PtyFactory: Send + Sync {
    fn start(
        &self,
        command: &str,
        args: &[String],
    ) -> anyhow::Result<(Box<dyn PtyStream>, Option<Box<dyn ProcessHandle>>)>;
}

/// Holds a freshly-started stream and process until a session owns them.
///
/// Between `PtyFactory::start` and `Session::start` the child is live but
/// nothing would ever close it; dropping an armed guard shuts the stream
/// down and kills + reaps the child, so every early return on that path
/// cleans up instead of leaking the fork.
pub struct SpawnGuard {
    stream: Option<Box<dyn PtyStream>>,
    process: Option<Box<dyn ProcessHandle>>,
}

impl SpawnGuard {
    pub fn new(stream: Box<dyn PtyStream>, process: Option<Box<dyn ProcessHandle>>) -> Self {
        Self { stream: Some(stream), process }
    }

    pub fn stream(&self) -> Option<&dyn PtyStream> {
        self.stream.as_deref()
    }

    /// Take the stream out (to wrap it); the process stays guarded.
    pub fn take_stream(&mut self) -> Option<Box<dyn PtyStream>> {
        self.stream.take()
    }

    pub fn set_stream(&mut self, stream: Box<dyn PtyStream>) {
        self.stream = Some(stream);
    }

    /// Hand both parts back; the guard stands down.
    pub fn disarm(mut self) -> (Option<Box<dyn PtyStream>>, Option<Box<dyn ProcessHandle>>) {
        (self.stream.take(), self.process.take())
    }
}

impl Drop for SpawnGuard {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
        if let Some(mut process) = self.process.take() {
            if process.is_alive() {
                if let Err(e) = process.kill() {
                    tracing::warn!("failed to kill orphaned child: {e}");
                }
            }
            // Reap in the background when a runtime is available; otherwise
            // the handle's own Drop is the fallback.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = process.wait().await;
                });
            }
        }
    }
}
