// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session factory: parses the shell command, starts the stream, wires
//! loggers and filters, and (for MCP sessions) installs the protocol
//! adapter before handing everything to [`Session::start`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use crate::agent::{AgentProfile, SessionInterface};
use crate::filter::{build_chain, resolve_filter_names, FilterEnv};
use crate::logger::LoggerConfig;
use crate::mcp::{McpAdapter, McpConfig};
use crate::publish::PublishPolicy;
use crate::pty::{ProcessHandle, PtyFactory, PtyReader, PtyStream, PtyWriter, SpawnGuard, StreamKind};
use crate::session::{Session, SessionConfig};
use crate::shell::split_command_line;
use crate::transcript::{
    log_timestamp, raw_sibling_path, InputLogger, McpEventLogger, SessionLogger,
};

/// Directories, sizes, and terminal geometry shared by all sessions.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub session_log_dir: Option<PathBuf>,
    pub input_history_dir: Option<PathBuf>,
    /// Also write an unfiltered `<base>.raw.txt` transcript.
    pub raw_transcript: bool,
    pub session_log_max_bytes: Option<u64>,
    pub buffer_lines: usize,
    pub cols: u16,
    pub rows: u16,
    /// Filter overrides; `None` reads the process environment.
    pub filter_env: Option<FilterEnv>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            session_log_dir: None,
            input_history_dir: None,
            raw_transcript: false,
            session_log_max_bytes: None,
            buffer_lines: 1000,
            cols: 200,
            rows: 50,
            filter_env: None,
        }
    }
}

/// What to build.
pub struct SessionSpec {
    pub id: String,
    pub title: String,
    pub role: String,
    pub command_line: String,
    pub agent: Option<AgentProfile>,
    pub interface: SessionInterface,
    pub config_hash: Option<String>,
}

impl SessionSpec {
    pub fn shell(id: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            role: String::new(),
            command_line: command_line.into(),
            agent: None,
            interface: SessionInterface::Cli,
            config_hash: None,
        }
    }
}

/// A started session plus the MCP adapter handle when one was installed.
pub struct BuiltSession {
    pub session: Arc<Session>,
    pub mcp: Option<Arc<McpAdapter>>,
}

pub struct SessionFactory {
    pty: Arc<dyn PtyFactory>,
    config: FactoryConfig,
}

impl SessionFactory {
    pub fn new(pty: Arc<dyn PtyFactory>, config: FactoryConfig) -> Self {
        Self { pty, config }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Start the child and assemble the session around it.
    pub fn build(&self, spec: SessionSpec) -> anyhow::Result<BuiltSession> {
        let (command, args) = split_command_line(&spec.command_line)?;
        let (stream, process) = self
            .pty
            .start(&command, &args)
            .with_context(|| format!("start {command}"))?;
        self.assemble(spec, stream, process)
    }

    /// Wire loggers, filters, and the publisher around an already-started
    /// stream.
    pub fn assemble(
        &self,
        spec: SessionSpec,
        stream: Box<dyn PtyStream>,
        process: Option<Box<dyn ProcessHandle>>,
    ) -> anyhow::Result<BuiltSession> {
        // The child is already running; until the session owns it, every
        // early return below must go through the guard so the fork is
        // killed and reaped instead of leaked.
        let mut guard = SpawnGuard::new(stream, process);
        let ts = log_timestamp(Utc::now());

        let logger = match &self.config.session_log_dir {
            Some(dir) => Some(Arc::new(
                SessionLogger::create(
                    dir,
                    &spec.id,
                    &ts,
                    self.config.session_log_max_bytes,
                    LoggerConfig::default(),
                )
                .context("open session log")?,
            )),
            None => None,
        };

        let raw_logger = match (&logger, self.config.raw_transcript) {
            (Some(main), true) => Some(Arc::new(
                SessionLogger::open(
                    raw_sibling_path(main.path()),
                    self.config.session_log_max_bytes,
                    LoggerConfig::default(),
                )
                .context("open raw session log")?,
            )),
            _ => None,
        };

        let input_logger = match &self.config.input_history_dir {
            Some(dir) => {
                let name = spec.agent.as_ref().map(|a| a.name.as_str()).unwrap_or(&spec.id);
                Some(Arc::new(
                    InputLogger::create(dir, name, &ts, InputLogger::default_config())
                        .context("open input history log")?,
                ))
            }
            None => None,
        };

        // MCP sessions get the protocol adapter between the raw stream and
        // the session loops. The adapter takes the stream; the guard keeps
        // the process (and regains the wrapped stream) either way.
        let mcp = if spec.interface == SessionInterface::Mcp {
            let event_logger = match &self.config.session_log_dir {
                Some(dir) => Some(Arc::new(
                    McpEventLogger::create(dir, &spec.id, &ts, LoggerConfig::default())
                        .context("open mcp event log")?,
                )),
                None => None,
            };
            let raw = guard.take_stream().context("spawn guard lost the stream")?;
            let adapter = Arc::new(McpAdapter::new(
                raw,
                McpConfig { event_logger, ..McpConfig::default() },
            )?);
            guard.set_stream(Box::new(SharedMcpStream(Arc::clone(&adapter))));
            Some(adapter)
        } else {
            None
        };

        // The adapter must never lose chunks; everything else tolerates drops.
        let publish_policy = match guard.stream().map(|s| s.kind()) {
            Some(StreamKind::Mcp) => PublishPolicy::Block,
            _ => PublishPolicy::DropOldest,
        };

        let env = self.config.filter_env.clone().unwrap_or_else(FilterEnv::from_process);
        let names = resolve_filter_names(spec.agent.as_ref(), spec.interface, &env);
        let chain = build_chain(&names, self.config.cols, self.config.rows);

        let (stream, process) = guard.disarm();
        let stream = stream.context("spawn guard lost the stream")?;
        let session = Session::start(
            SessionConfig {
                id: spec.id,
                title: spec.title,
                role: spec.role,
                agent_id: spec.agent.as_ref().map(|a| a.name.clone()),
                command: spec.command_line,
                config_hash: spec.config_hash,
                buffer_lines: self.config.buffer_lines,
                publish_policy,
                chain,
                logger,
                raw_logger,
                input_logger,
            },
            stream,
            process,
        )?;

        Ok(BuiltSession { session, mcp })
    }
}

/// `PtyStream` delegation so the factory can keep a handle on the adapter
/// (turn handler, ready gate) while the session owns the stream.
struct SharedMcpStream(Arc<McpAdapter>);

impl PtyStream for SharedMcpStream {
    fn split(&self) -> anyhow::Result<(Box<dyn PtyReader>, Box<dyn PtyWriter>)> {
        self.0.split()
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.0.resize(cols, rows)
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        self.0.shutdown()
    }

    fn kind(&self) -> StreamKind {
        self.0.kind()
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
