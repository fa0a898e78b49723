// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent profile types and the external registry seam.
//!
//! Profiles are loaded elsewhere (config files, an API); the core only needs
//! the fields that drive session construction: shell, prompt lists, CLI type,
//! readiness marker, singleton policy, and filter overrides.

use serde::{Deserialize, Serialize};

use crate::error::TermError;

/// Profile describing how to run one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    /// Shell command line used to launch the agent's CLI, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Prompt template names injected after startup.
    #[serde(default)]
    pub prompts: Vec<String>,
    /// Skill template names injected after the prompts.
    #[serde(default)]
    pub skills: Vec<String>,
    /// CLI flavor ("codex", "claude", ...). Case-insensitive where matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_type: Option<String>,
    /// Line the CLI prints when it is ready to accept prompt injection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_air_string: Option<String>,
    /// At most one live session per agent name when set.
    #[serde(default = "default_true")]
    pub singleton: bool,
    /// Whether the agent participates in workflow orchestration.
    #[serde(default = "default_true")]
    pub use_workflow: bool,
    /// Explicit output-filter chain override (ordered filter names).
    #[serde(default)]
    pub output_filters: Vec<String>,
    /// Single-filter override, used when `output_filters` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_filter: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AgentProfile {
    /// Minimal profile with defaults matching deserialization.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shell: None,
            prompts: vec![],
            skills: vec![],
            cli_type: None,
            on_air_string: None,
            singleton: true,
            use_workflow: true,
            output_filters: vec![],
            output_filter: None,
        }
    }

    /// True when the CLI type matches `kind` ignoring case.
    pub fn is_cli_type(&self, kind: &str) -> bool {
        self.cli_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(kind))
    }
}

/// External source of agent profiles.
pub trait AgentRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<AgentProfile>;
}

/// How a session's byte stream is consumed by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionInterface {
    /// Interactive terminal output destined for the filter chain.
    Cli,
    /// Line-delimited JSON-RPC bridged by the MCP adapter.
    Mcp,
}

impl SessionInterface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for SessionInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionInterface {
    type Err = TermError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cli" => Ok(Self::Cli),
            "mcp" => Ok(Self::Mcp),
            other => Err(TermError::InvalidRunner(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
