// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sentinel error kinds surfaced to manager callers.
//!
//! Internal plumbing uses `anyhow` context chains; these typed variants exist
//! for the cases callers are expected to match on (lookup misses, singleton
//! conflicts, closed sessions, id validation).

use thiserror::Error;

/// Errors returned by the manager, factory, and session APIs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TermError {
    /// No agent profile registered under this id.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// No live session with this terminal id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A singleton agent already holds a live session.
    #[error("agent {agent} already running in terminal {terminal_id}")]
    AgentAlreadyRunning { agent: String, terminal_id: String },

    /// The session is closing or closed; no further writes are accepted.
    #[error("session closed")]
    SessionClosed,

    /// A session id failed validation (length, separators, control bytes).
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// An agent name sanitized down to nothing.
    #[error("agent name is empty after sanitization")]
    EmptyAgentName,

    /// The requested session interface is not a known runner kind.
    #[error("invalid runner kind: {0}")]
    InvalidRunner(String),

    /// A shell command line could not be parsed.
    #[error("unterminated quote in command line")]
    UnterminatedQuote,

    /// A shell command line parsed to zero words.
    #[error("empty command line")]
    EmptyCommand,
}

/// Join multiple teardown errors into one, preserving each message in order.
///
/// Returns `None` when the list is empty so callers can keep `Ok(())` paths
/// allocation-free.
pub fn join_errors(mut errors: Vec<anyhow::Error>) -> Option<anyhow::Error> {
    match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => {
            let joined = errors.iter().map(|e| format!("{e:#}")).collect::<Vec<_>>().join("; ");
            Some(anyhow::anyhow!(joined))
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
