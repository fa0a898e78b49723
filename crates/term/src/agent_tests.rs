// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{AgentProfile, SessionInterface};
use crate::error::TermError;

#[test]
fn defaults_from_minimal_json() -> anyhow::Result<()> {
    let profile: AgentProfile = serde_json::from_str(r#"{"name": "Codex"}"#)?;
    assert_eq!(profile.name, "Codex");
    assert!(profile.singleton);
    assert!(profile.use_workflow);
    assert!(profile.prompts.is_empty());
    assert!(profile.output_filters.is_empty());
    assert!(profile.cli_type.is_none());
    Ok(())
}

#[test]
fn cli_type_match_is_case_insensitive() {
    let mut profile = AgentProfile::new("a");
    profile.cli_type = Some("CoDeX".into());
    assert!(profile.is_cli_type("codex"));
    assert!(!profile.is_cli_type("claude"));

    let bare = AgentProfile::new("b");
    assert!(!bare.is_cli_type("codex"));
}

#[test]
fn interface_parses_known_kinds() -> anyhow::Result<()> {
    assert_eq!("cli".parse::<SessionInterface>()?, SessionInterface::Cli);
    assert_eq!("MCP".parse::<SessionInterface>()?, SessionInterface::Mcp);
    assert_eq!(
        "workflow".parse::<SessionInterface>(),
        Err(TermError::InvalidRunner("workflow".into()))
    );
    Ok(())
}
