// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use bytes::Bytes;

use super::{AsyncFileLogger, BackpressurePolicy, LoggerConfig};

fn open_append(path: &std::path::Path) -> anyhow::Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new().create(true).append(true).open(path)?)
}

fn line_encoder() -> super::Encoder<String> {
    Box::new(|s: &String| {
        if s.is_empty() {
            None
        } else {
            let mut out = s.clone().into_bytes();
            out.push(b'\n');
            Some(Bytes::from(out))
        }
    })
}

#[tokio::test]
async fn close_drains_in_write_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("drain.log");
    let logger = AsyncFileLogger::new(
        path.clone(),
        open_append(&path)?,
        LoggerConfig::default(),
        line_encoder(),
    );

    for i in 0..20 {
        logger.write(format!("line-{i}")).await;
    }
    logger.close().await;

    let contents = std::fs::read_to_string(&path)?;
    let expected: String = (0..20).map(|i| format!("line-{i}\n")).collect();
    assert_eq!(contents, expected);
    Ok(())
}

#[tokio::test]
async fn encoder_none_is_skipped() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("skip.log");
    let logger = AsyncFileLogger::new(
        path.clone(),
        open_append(&path)?,
        LoggerConfig::default(),
        line_encoder(),
    );

    logger.write("keep".into()).await;
    logger.write(String::new()).await;
    logger.write("also".into()).await;
    logger.close().await;

    assert_eq!(std::fs::read_to_string(&path)?, "keep\nalso\n");
    Ok(())
}

#[tokio::test]
async fn drop_oldest_counts_and_keeps_newest() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("drop.log");
    let config = LoggerConfig {
        capacity: 2,
        policy: BackpressurePolicy::DropOldest,
        ..LoggerConfig::default()
    };
    let logger = AsyncFileLogger::new(path.clone(), open_append(&path)?, config, line_encoder());

    // Current-thread test runtime: no yield between writes, so the worker
    // cannot drain mid-burst and eviction is deterministic.
    for i in 0..5 {
        logger.write(format!("item-{i}")).await;
    }
    logger.close().await;

    assert_eq!(logger.stats().dropped, 3);
    assert_eq!(std::fs::read_to_string(&path)?, "item-3\nitem-4\n");
    Ok(())
}

#[tokio::test]
async fn block_policy_waits_for_room() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("block.log");
    let config = LoggerConfig {
        capacity: 1,
        policy: BackpressurePolicy::Block,
        ..LoggerConfig::default()
    };
    let logger = AsyncFileLogger::new(path.clone(), open_append(&path)?, config, line_encoder());

    logger.write("first".into()).await;
    logger.write("second".into()).await;
    logger.close().await;

    assert_eq!(logger.stats().blocked, 1);
    assert_eq!(logger.stats().dropped, 0);
    assert_eq!(std::fs::read_to_string(&path)?, "first\nsecond\n");
    Ok(())
}

#[tokio::test]
async fn write_after_close_is_noop() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("closed.log");
    let logger = AsyncFileLogger::new(
        path.clone(),
        open_append(&path)?,
        LoggerConfig::default(),
        line_encoder(),
    );

    logger.write("before".into()).await;
    logger.close().await;
    logger.write("after".into()).await;
    logger.close().await; // idempotent

    assert_eq!(std::fs::read_to_string(&path)?, "before\n");
    Ok(())
}

#[tokio::test]
async fn threshold_flush_lands_without_close() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("threshold.log");
    let config = LoggerConfig {
        flush_threshold: 8,
        flush_interval: Duration::from_secs(3600),
        ..LoggerConfig::default()
    };
    let logger = AsyncFileLogger::new(path.clone(), open_append(&path)?, config, line_encoder());

    logger.write("0123456789abcdef".into()).await;
    // Yield until the worker has flushed the over-threshold batch.
    for _ in 0..100 {
        tokio::task::yield_now().await;
        if std::fs::metadata(&path)?.len() > 0 {
            break;
        }
    }
    assert_eq!(std::fs::read_to_string(&path)?, "0123456789abcdef\n");

    logger.close().await;
    Ok(())
}
