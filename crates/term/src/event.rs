// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events emitted on the terminal and agent broadcast buses.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Terminal-scoped lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    TerminalCreated {
        terminal_id: String,
        title: String,
        command: String,
    },
    TerminalClosed {
        terminal_id: String,
    },
    TerminalError {
        terminal_id: String,
        error: String,
        /// Filtered tail of the last output lines, capped in size.
        output_tail: String,
    },
}

/// Agent-scoped lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStarted {
        agent: String,
        terminal_id: String,
    },
    AgentStopped {
        agent: String,
        terminal_id: String,
    },
    AgentError {
        agent: String,
        terminal_id: String,
        error: String,
        output_tail: String,
    },
    /// One MCP tool call completed.
    AgentTurnComplete {
        agent: String,
        terminal_id: String,
        turn: u64,
        thread_id: Option<String>,
        /// Stable id: `gestalt-mcp:<session>:<turn>`.
        event_id: String,
    },
}

/// Buses the manager publishes on. Sends to buses with no subscribers are
/// fine; events are simply dropped.
#[derive(Clone)]
pub struct EventBuses {
    pub terminal_tx: broadcast::Sender<TerminalEvent>,
    pub agent_tx: broadcast::Sender<AgentEvent>,
}

impl EventBuses {
    pub fn new(capacity: usize) -> Self {
        let (terminal_tx, _) = broadcast::channel(capacity);
        let (agent_tx, _) = broadcast::channel(capacity);
        Self { terminal_tx, agent_tx }
    }
}

impl Default for EventBuses {
    fn default() -> Self {
        Self::new(256)
    }
}
