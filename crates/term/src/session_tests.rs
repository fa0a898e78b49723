// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{Session, SessionConfig, SessionState};
use crate::error::TermError;
use crate::filter::{AnsiStripFilter, FilterChain, Utf8GuardFilter};
use crate::logger::LoggerConfig;
use crate::test_support::ScriptedPty;
use crate::transcript::SessionLogger;

fn timeout<F: std::future::Future>(fut: F) -> tokio::time::Timeout<F> {
    tokio::time::timeout(Duration::from_secs(5), fut)
}

#[tokio::test]
async fn output_reaches_subscribers_and_transcript() -> anyhow::Result<()> {
    crate::test_support::init_tracing();
    let tmp = tempfile::tempdir()?;
    let logger = Arc::new(SessionLogger::create(
        tmp.path(),
        "s1",
        "20260101-000000",
        None,
        LoggerConfig::default(),
    )?);

    let (pty, handle) = ScriptedPty::new();
    let mut config = SessionConfig::bare("s1", "fake-shell");
    config.logger = Some(Arc::clone(&logger));
    let session = Session::start(config, Box::new(pty), None)?;
    assert_eq!(session.state(), SessionState::Running);

    let mut sub = session.subscribe();
    handle.feed_tx.send(Bytes::from_static(b"hello\n")).await?;
    assert_eq!(timeout(sub.recv()).await?, Some(Bytes::from_static(b"hello\n")));

    session.close().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(session.state(), SessionState::Closed);

    let contents = std::fs::read(tmp.path().join("s1-20260101-000000.txt"))?;
    assert_eq!(contents, b"hello\n");
    Ok(())
}

#[tokio::test]
async fn write_reaches_the_child() -> anyhow::Result<()> {
    let (pty, mut handle) = ScriptedPty::new();
    let session = Session::start(SessionConfig::bare("s2", "sh"), Box::new(pty), None)?;

    session.write(Bytes::from_static(b"ls\r")).await?;
    let written = timeout(handle.written_rx.recv()).await?;
    assert_eq!(written, Some(Bytes::from_static(b"ls\r")));

    let _ = session.close().await;
    Ok(())
}

#[tokio::test]
async fn send_command_records_history_and_appends_cr() -> anyhow::Result<()> {
    let (pty, mut handle) = ScriptedPty::new();
    let session = Session::start(SessionConfig::bare("s3", "sh"), Box::new(pty), None)?;

    session.send_command("  status  ").await?;
    session.send_command("   ").await?; // discarded

    let written = timeout(handle.written_rx.recv()).await?;
    assert_eq!(written, Some(Bytes::from_static(b"status\r")));

    let history = session.input_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].command, "status");

    let _ = session.close().await;
    Ok(())
}

#[tokio::test]
async fn filter_chain_applies_to_broadcast_output() -> anyhow::Result<()> {
    let (pty, handle) = ScriptedPty::new();
    let mut config = SessionConfig::bare("s4", "sh");
    config.chain = FilterChain::new(vec![
        Box::new(AnsiStripFilter::new()),
        Box::new(Utf8GuardFilter::new()),
    ]);
    let session = Session::start(config, Box::new(pty), None)?;

    let mut sub = session.subscribe();
    handle.feed_tx.send(Bytes::from_static(b"ok\x1b[31mred\x1b[0m\n")).await?;
    assert_eq!(timeout(sub.recv()).await?, Some(Bytes::from_static(b"okred\n")));

    let _ = session.close().await;
    Ok(())
}

#[tokio::test]
async fn resize_reaches_filters_and_stream() -> anyhow::Result<()> {
    let (pty, handle) = ScriptedPty::new();
    let mut config = SessionConfig::bare("s4r", "sh");
    config.chain = FilterChain::new(vec![Box::new(AnsiStripFilter::new())]);
    let session = Session::start(config, Box::new(pty), None)?;

    handle.feed_tx.send(Bytes::from_static(b"abc")).await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.filter_stats()[0].in_bytes < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    session.resize(120, 40)?;
    let stats = session.filter_stats();
    assert_eq!(stats[0].filter_name, "ansi-strip");
    assert_eq!(stats[0].in_bytes, 3);

    let _ = session.close().await;
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_stable() -> anyhow::Result<()> {
    let (pty, _handle) = ScriptedPty::new();
    let session = Session::start(SessionConfig::bare("s5", "sh"), Box::new(pty), None)?;

    let first = session.close().await;
    let second = session.close().await;
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn write_after_close_returns_session_closed() -> anyhow::Result<()> {
    let (pty, _handle) = ScriptedPty::new();
    let session = Session::start(SessionConfig::bare("s6", "sh"), Box::new(pty), None)?;
    let _ = session.close().await;

    let err = session.write(Bytes::from_static(b"x")).await;
    assert_eq!(err, Err(TermError::SessionClosed));

    let err = session.send_command("y").await;
    assert_eq!(err, Err(TermError::SessionClosed));
    Ok(())
}

#[tokio::test]
async fn stream_eof_funnels_into_close() -> anyhow::Result<()> {
    let (pty, handle) = ScriptedPty::new();
    let session = Session::start(SessionConfig::bare("s7", "sh"), Box::new(pty), None)?;
    let closed = session.closed_token();

    // Child "exits": the feed side closes, the read loop sees EOF.
    drop(handle);
    timeout(closed.cancelled()).await?;
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn history_falls_back_to_log_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let logger = Arc::new(SessionLogger::create(
        tmp.path(),
        "s8",
        "20260101-000000",
        None,
        LoggerConfig::default(),
    )?);

    let (pty, handle) = ScriptedPty::new();
    let mut config = SessionConfig::bare("s8", "sh");
    config.logger = Some(logger);
    let session = Session::start(config, Box::new(pty), None)?;

    handle.feed_tx.send(Bytes::from_static(b"a\nb\nc\n")).await?;
    let closed = session.closed_token();
    drop(handle);
    timeout(closed.cancelled()).await?;

    // Live buffer view.
    let lines = session.history_lines(2);
    assert_eq!(lines, vec!["c", ""]);

    // A fresh session with no buffered output reads the file.
    let (pty2, _handle2) = ScriptedPty::new();
    let mut config2 = SessionConfig::bare("s8b", "sh");
    config2.logger = Some(Arc::new(SessionLogger::open(
        tmp.path().join("s8-20260101-000000.txt"),
        None,
        LoggerConfig::default(),
    )?));
    let session2 = Session::start(config2, Box::new(pty2), None)?;
    let lines = session2.history_lines(2);
    assert_eq!(lines, vec!["b", "c"]);
    let _ = session2.close().await;
    Ok(())
}
