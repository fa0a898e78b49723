// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles: an in-memory scripted stream standing in for a PTY,
//! plus a factory and registry over it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::agent::{AgentProfile, AgentRegistry};
use crate::pty::{ExitStatus, ProcessHandle, PtyFactory, PtyReader, PtyStream, PtyWriter};

/// Install a test subscriber once so `RUST_LOG=debug cargo test` shows the
/// crate's tracing output. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test-side controls for one [`ScriptedPty`].
pub struct ScriptHandle {
    /// Feed bytes that the "child" prints.
    pub feed_tx: mpsc::Sender<Bytes>,
    /// Observe bytes the session wrote to the "child".
    pub written_rx: mpsc::Receiver<Bytes>,
}

impl ScriptHandle {
    /// Collect everything written so far into one buffer (non-blocking).
    pub fn drain_written(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.written_rx.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// In-memory bidirectional stream with the PTY seam's shape.
pub struct ScriptedPty {
    halves: Mutex<Option<(Box<dyn PtyReader>, Box<dyn PtyWriter>)>>,
}

impl ScriptedPty {
    pub fn new() -> (Self, ScriptHandle) {
        let (feed_tx, feed_rx) = mpsc::channel(256);
        let (written_tx, written_rx) = mpsc::channel(256);
        let reader = Box::new(ScriptedReader { rx: feed_rx, leftover: Bytes::new() });
        let writer = Box::new(ScriptedWriter { tx: written_tx });
        let pty = Self { halves: Mutex::new(Some((reader as _, writer as _))) };
        (pty, ScriptHandle { feed_tx, written_rx })
    }
}

impl PtyStream for ScriptedPty {
    fn split(&self) -> anyhow::Result<(Box<dyn PtyReader>, Box<dyn PtyWriter>)> {
        self.halves.lock().take().ok_or_else(|| anyhow::anyhow!("already split"))
    }

    fn resize(&self, _cols: u16, _rows: u16) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        self.halves.lock().take();
        Ok(())
    }
}

struct ScriptedReader {
    rx: mpsc::Receiver<Bytes>,
    leftover: Bytes,
}

impl PtyReader for ScriptedReader {
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

struct ScriptedWriter {
    tx: mpsc::Sender<Bytes>,
}

impl PtyWriter for ScriptedWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            self.tx
                .send(Bytes::copy_from_slice(data))
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "script closed"))
        })
    }
}

/// Process handle double: alive until killed or waited. The flag is shared
/// so tests can observe teardown after the handle was moved away.
pub struct ScriptedProcess {
    alive: Arc<std::sync::atomic::AtomicBool>,
}

impl ScriptedProcess {
    pub fn new() -> Self {
        Self { alive: Arc::new(std::sync::atomic::AtomicBool::new(true)) }
    }

    pub fn alive_flag(&self) -> Arc<std::sync::atomic::AtomicBool> {
        Arc::clone(&self.alive)
    }
}

impl Default for ScriptedProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessHandle for ScriptedProcess {
    fn is_alive(&mut self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::Acquire)
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.alive.store(false, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    fn wait(&mut self) -> BoxFuture<'_, anyhow::Result<ExitStatus>> {
        Box::pin(async move {
            self.alive.store(false, std::sync::atomic::Ordering::Release);
            Ok(ExitStatus { code: Some(0), signal: None })
        })
    }
}

/// Factory that hands out scripted streams and parks their handles (and
/// per-process alive flags) for the test to pick up.
pub struct ScriptedFactory {
    handles: Mutex<Vec<(String, ScriptHandle)>>,
    processes: Mutex<Vec<(String, Arc<std::sync::atomic::AtomicBool>)>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { handles: Mutex::new(Vec::new()), processes: Mutex::new(Vec::new()) })
    }

    /// Take the script handle for the most recent start of `command`.
    pub fn take_handle(&self, command: &str) -> Option<ScriptHandle> {
        let mut handles = self.handles.lock();
        let idx = handles.iter().rposition(|(cmd, _)| cmd == command)?;
        Some(handles.remove(idx).1)
    }

    /// Whether the most recently started `command` child is still alive.
    pub fn process_alive(&self, command: &str) -> Option<bool> {
        let processes = self.processes.lock();
        processes
            .iter()
            .rfind(|(cmd, _)| cmd == command)
            .map(|(_, alive)| alive.load(std::sync::atomic::Ordering::Acquire))
    }
}

impl PtyFactory for ScriptedFactory {
    fn start(
        &self,
        command: &str,
        _args: &[String],
    ) -> anyhow::Result<(Box<dyn PtyStream>, Option<Box<dyn ProcessHandle>>)> {
        let (pty, handle) = ScriptedPty::new();
        let process = ScriptedProcess::new();
        self.handles.lock().push((command.to_owned(), handle));
        self.processes.lock().push((command.to_owned(), process.alive_flag()));
        Ok((Box::new(pty), Some(Box::new(process))))
    }
}

/// Fixed-map agent registry.
pub struct MapRegistry {
    profiles: HashMap<String, AgentProfile>,
}

impl MapRegistry {
    pub fn new(profiles: Vec<AgentProfile>) -> Arc<Self> {
        let profiles = profiles.into_iter().map(|p| (p.name.clone(), p)).collect();
        Arc::new(Self { profiles })
    }
}

impl AgentRegistry for MapRegistry {
    fn get(&self, id: &str) -> Option<AgentProfile> {
        self.profiles.get(id).cloned()
    }
}
