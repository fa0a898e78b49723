// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::{
    merge_overlap, read_lines_before, sanitize_session_name, validate_session_id, CreateOptions,
    Manager, ManagerConfig,
};
use crate::agent::{AgentProfile, SessionInterface};
use crate::error::TermError;
use crate::event::{AgentEvent, TerminalEvent};
use crate::factory::FactoryConfig;
use crate::filter::FilterEnv;
use crate::pty::{ProcessHandle, PtyFactory, PtyStream};
use crate::test_support::{MapRegistry, ScriptedFactory};

fn agent(name: &str, shell: &str) -> AgentProfile {
    let mut profile = AgentProfile::new(name);
    profile.shell = Some(shell.to_owned());
    profile
}

fn manager_with(
    profiles: Vec<AgentProfile>,
) -> (Arc<Manager>, Arc<ScriptedFactory>) {
    let pty = ScriptedFactory::new();
    let registry = MapRegistry::new(profiles);
    let config = ManagerConfig {
        factory: FactoryConfig {
            filter_env: Some(FilterEnv { disable: true, filters: None }),
            ..FactoryConfig::default()
        },
        ..ManagerConfig::default()
    };
    let manager = Manager::new(pty.clone(), registry, None, config);
    (manager, pty)
}

#[yare::parameterized(
    slashes_dropped = { "Bad/Name (Codex)", Some("BadName (Codex)") },
    backslashes_dropped = { r"a\b", Some("ab") },
    control_chars_dropped = { "a\u{1}b\tc", Some("abc") },
    trimmed = { "  Codex  ", Some("Codex") },
    pure_separators_rejected = { "/ ", None },
    empty_rejected = { "", None },
)]
fn sanitization(input: &str, expected: Option<&str>) {
    assert_eq!(sanitize_session_name(input).ok().as_deref(), expected);
}

#[test]
fn session_id_validation() {
    assert!(validate_session_id("Codex 1").is_ok());
    assert!(validate_session_id("").is_err());
    assert!(validate_session_id("a/b").is_err());
    assert!(validate_session_id(&"x".repeat(200)).is_err());
}

#[tokio::test]
async fn sanitized_id_allocation_first_create() -> anyhow::Result<()> {
    let (manager, _pty) = manager_with(vec![agent("Bad/Name (Codex)", "fake")]);
    let session = manager.create_agent_session("Bad/Name (Codex)", CreateOptions::default()).await?;
    assert_eq!(session.id(), "BadName (Codex) 1");
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn singleton_conflict_reports_existing_terminal() -> anyhow::Result<()> {
    let (manager, _pty) = manager_with(vec![agent("Codex", "fake")]);
    let first = manager.create_agent_session("Codex", CreateOptions::default()).await?;

    let err = match manager.create_agent_session("Codex", CreateOptions::default()).await {
        Err(e) => e,
        Ok(_) => anyhow::bail!("expected conflict"),
    };
    assert_eq!(
        err.downcast_ref::<TermError>(),
        Some(&TermError::AgentAlreadyRunning {
            agent: "Codex".into(),
            terminal_id: first.id().to_owned(),
        })
    );
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn sequence_advances_across_restarts() -> anyhow::Result<()> {
    let (manager, _pty) = manager_with(vec![agent("Codex", "fake")]);
    let first = manager.create_agent_session("Codex", CreateOptions::default()).await?;
    assert_eq!(first.id(), "Codex 1");
    manager.delete_session("Codex 1").await?;

    let second = manager.create_agent_session("Codex", CreateOptions::default()).await?;
    assert_eq!(second.id(), "Codex 2");
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn non_singleton_agents_share_a_prefix() -> anyhow::Result<()> {
    let mut profile = agent("Worker", "fake");
    profile.singleton = false;
    let (manager, _pty) = manager_with(vec![profile]);

    let a = manager.create_agent_session("Worker", CreateOptions::default()).await?;
    let b = manager.create_agent_session("Worker", CreateOptions::default()).await?;
    assert_eq!(a.id(), "Worker 1");
    assert_eq!(b.id(), "Worker 2");
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_agent_is_lookup_error() -> anyhow::Result<()> {
    let (manager, _pty) = manager_with(vec![]);
    let err = match manager.create_agent_session("ghost", CreateOptions::default()).await {
        Err(e) => e,
        Ok(_) => anyhow::bail!("expected error"),
    };
    assert_eq!(err.downcast_ref::<TermError>(), Some(&TermError::AgentNotFound("ghost".into())));
    Ok(())
}

#[tokio::test]
async fn shell_sessions_use_numeric_ids() -> anyhow::Result<()> {
    let (manager, _pty) = manager_with(vec![]);
    let a = manager.create_shell_session("sh -l").await?;
    let b = manager.create_shell_session("sh -l").await?;
    assert_eq!(a.id(), "1");
    assert_eq!(b.id(), "2");
    manager.shutdown().await;
    Ok(())
}

struct FailingFactory;

impl PtyFactory for FailingFactory {
    fn start(
        &self,
        _command: &str,
        _args: &[String],
    ) -> anyhow::Result<(Box<dyn PtyStream>, Option<Box<dyn ProcessHandle>>)> {
        anyhow::bail!("pty backend down")
    }
}

#[tokio::test]
async fn failed_start_releases_singleton_reservation() -> anyhow::Result<()> {
    let registry = MapRegistry::new(vec![agent("Codex", "fake")]);
    let manager = Manager::new(
        Arc::new(FailingFactory),
        registry,
        None,
        ManagerConfig::default(),
    );

    let first = manager.create_agent_session("Codex", CreateOptions::default()).await;
    assert!(first.is_err());
    // The reservation must be gone: the retry fails on the backend again,
    // not on AgentAlreadyRunning.
    let second = match manager.create_agent_session("Codex", CreateOptions::default()).await {
        Err(e) => e,
        Ok(_) => anyhow::bail!("expected error"),
    };
    assert!(second.downcast_ref::<TermError>().is_none(), "got: {second}");
    assert!(manager.agent_terminal("Codex").is_none());
    Ok(())
}

#[tokio::test]
async fn failed_log_setup_kills_child_and_releases_reservation() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let bogus = tmp.path().join("log-dir-is-a-file");
    std::fs::write(&bogus, b"x")?;

    let pty = ScriptedFactory::new();
    let manager = Manager::new(
        pty.clone(),
        MapRegistry::new(vec![agent("Codex", "fake")]),
        None,
        ManagerConfig {
            factory: FactoryConfig {
                session_log_dir: Some(bogus),
                ..FactoryConfig::default()
            },
            ..ManagerConfig::default()
        },
    );

    // The fork happens before the transcript open fails; the child must not
    // outlive the failed create.
    let result = manager.create_agent_session("Codex", CreateOptions::default()).await;
    assert!(result.is_err());
    assert_eq!(pty.process_alive("fake"), Some(false));
    assert!(manager.agent_terminal("Codex").is_none());

    // Retrying hits the same IO failure, not a stale singleton reservation.
    let retry = match manager.create_agent_session("Codex", CreateOptions::default()).await {
        Err(e) => e,
        Ok(_) => anyhow::bail!("expected error"),
    };
    assert!(retry.downcast_ref::<TermError>().is_none(), "got: {retry}");
    Ok(())
}

#[tokio::test]
async fn lifecycle_events_are_emitted() -> anyhow::Result<()> {
    let (manager, _pty) = manager_with(vec![agent("Codex", "fake")]);
    let mut terminal_rx = manager.events().terminal_tx.subscribe();
    let mut agent_rx = manager.events().agent_tx.subscribe();

    let session = manager.create_agent_session("Codex", CreateOptions::default()).await?;
    assert_eq!(
        terminal_rx.recv().await?,
        TerminalEvent::TerminalCreated {
            terminal_id: session.id().to_owned(),
            title: "Codex".into(),
            command: "fake".into(),
        }
    );
    assert_eq!(
        agent_rx.recv().await?,
        AgentEvent::AgentStarted { agent: "Codex".into(), terminal_id: session.id().to_owned() }
    );

    manager.delete_session(session.id()).await?;
    assert_eq!(
        terminal_rx.recv().await?,
        TerminalEvent::TerminalClosed { terminal_id: session.id().to_owned() }
    );
    assert_eq!(
        agent_rx.recv().await?,
        AgentEvent::AgentStopped { agent: "Codex".into(), terminal_id: session.id().to_owned() }
    );
    Ok(())
}

#[tokio::test]
async fn mcp_turn_emits_stable_event_id() -> anyhow::Result<()> {
    crate::test_support::init_tracing();
    let (manager, pty) = manager_with(vec![agent("Codex", "codex mcp")]);
    let mut agent_rx = manager.events().agent_tx.subscribe();

    let session = manager
        .create_agent_session(
            "Codex",
            CreateOptions { interface: Some(SessionInterface::Mcp), ..CreateOptions::default() },
        )
        .await?;
    assert_eq!(session.id(), "Codex 1");

    // Act as the MCP server on the scripted stream.
    let mut handle = pty.take_handle("codex").ok_or_else(|| anyhow::anyhow!("no pty"))?;
    session.write(bytes::Bytes::from_static(b"hello\r")).await?;

    let mut buf: Vec<u8> = Vec::new();
    let mut frames = Vec::new();
    // initialize, initialized, tools/call
    while frames.len() < 3 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), handle.written_rx.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream closed"))?;
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let value: serde_json::Value = serde_json::from_slice(&line[..line.len() - 1])?;
            let is_request = value.get("id").is_some();
            frames.push(value.clone());
            if is_request {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": value["id"],
                    "result": { "content": "ok", "threadId": "t-9" },
                });
                let mut out = serde_json::to_vec(&reply)?;
                out.push(b'\n');
                handle.feed_tx.send(out.into()).await?;
            }
        }
    }

    let event = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), agent_rx.recv()).await??;
        if let AgentEvent::AgentTurnComplete { .. } = event {
            break event;
        }
    };
    assert_eq!(
        event,
        AgentEvent::AgentTurnComplete {
            agent: "Codex".into(),
            terminal_id: "Codex 1".into(),
            turn: 1,
            thread_id: Some("t-9".into()),
            event_id: "gestalt-mcp:Codex 1:1".into(),
        }
    );

    manager.shutdown().await;
    Ok(())
}

#[test]
fn merge_overlap_removes_duplicated_tail() {
    let file = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
    let memory = vec!["b".to_owned(), "c".to_owned(), "d".to_owned(), String::new()];
    assert_eq!(merge_overlap(file, memory), vec!["a", "b", "c", "d", ""]);
}

#[test]
fn merge_overlap_without_common_lines_concatenates() {
    let file = vec!["x".to_owned()];
    let memory = vec!["y".to_owned()];
    assert_eq!(merge_overlap(file, memory), vec!["x", "y"]);
}

#[test]
fn merge_overlap_identical_pages_dedupe_fully() {
    let file = vec!["c".to_owned(), String::new()];
    let memory = vec!["c".to_owned(), String::new()];
    assert_eq!(merge_overlap(file, memory), vec!["c", ""]);
}

#[test]
fn paging_walks_backwards_through_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("t-20260101-000000.txt");
    std::fs::write(&path, b"one\ntwo\nthree\nfour\n")?;

    let (page1, cursor1) = read_lines_before(&path, None, 2)?;
    assert_eq!(page1, vec!["three", "four"]);
    let cursor1 = cursor1.ok_or_else(|| anyhow::anyhow!("expected cursor"))?;

    let (page2, cursor2) = read_lines_before(&path, Some(cursor1), 2)?;
    assert_eq!(page2, vec!["one", "two"]);
    assert_eq!(cursor2, None);
    Ok(())
}

#[tokio::test]
async fn history_for_dead_session_reads_log_dir() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("old 7-20260101-000000.txt"), b"line1\nline2\n")?;

    let pty = ScriptedFactory::new();
    let manager = Manager::new(
        pty,
        MapRegistry::new(vec![]),
        None,
        ManagerConfig {
            factory: FactoryConfig {
                session_log_dir: Some(tmp.path().to_path_buf()),
                ..FactoryConfig::default()
            },
            ..ManagerConfig::default()
        },
    );

    let page = manager.history("old 7", 10, None)?;
    assert_eq!(page.lines, vec!["line1", "line2"]);

    let missing = manager.history("never existed", 10, None);
    let err = match missing {
        Err(e) => e,
        Ok(_) => anyhow::bail!("expected error"),
    };
    assert_eq!(
        err.downcast_ref::<TermError>(),
        Some(&TermError::SessionNotFound("never existed".into()))
    );
    Ok(())
}
