// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{OutputPublisher, PublishPolicy, PublishTargets};
use crate::broadcast::Broadcaster;
use crate::ring::OutputBuffer;
use crate::transcript::SessionLogger;
use crate::logger::LoggerConfig;

#[tokio::test]
async fn delivers_to_logger_buffer_and_bus() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let logger = Arc::new(SessionLogger::create(
        tmp.path(),
        "pub",
        "20260101-000000",
        None,
        LoggerConfig::default(),
    )?);
    let buffer = Arc::new(Mutex::new(OutputBuffer::new(64)));
    let bus = Broadcaster::new(64);
    let mut sub = bus.subscribe();

    let publisher = OutputPublisher::new(
        PublishPolicy::Block,
        PublishTargets {
            logger: Some(Arc::clone(&logger)),
            buffer: Some(Arc::clone(&buffer)),
            bus: Some(Arc::clone(&bus)),
        },
        CancellationToken::new(),
    );

    publisher.publish(Bytes::from_static(b"line one\n")).await;
    publisher.close().await;

    assert_eq!(sub.recv().await, Some(Bytes::from_static(b"line one\n")));
    assert_eq!(sub.recv().await, None); // bus closed on publisher close
    assert_eq!(buffer.lock().lines(), vec!["line one", ""]);

    let contents = std::fs::read(tmp.path().join("pub-20260101-000000.txt"))?;
    assert_eq!(contents, b"line one\n");
    Ok(())
}

#[tokio::test]
async fn sample_policy_keeps_one_in_k() -> anyhow::Result<()> {
    let buffer = Arc::new(Mutex::new(OutputBuffer::new(1024)));
    let publisher = OutputPublisher::new(
        PublishPolicy::Sample(4),
        PublishTargets { buffer: Some(Arc::clone(&buffer)), ..PublishTargets::default() },
        CancellationToken::new(),
    );

    for i in 0..16u32 {
        publisher.publish(Bytes::from(format!("{i}\n"))).await;
    }
    publisher.close().await;

    assert_eq!(publisher.dropped(), 12);
    let lines = buffer.lock().lines();
    assert_eq!(lines, vec!["0", "4", "8", "12", ""]);
    Ok(())
}

#[tokio::test]
async fn sample_zero_never_drops() -> anyhow::Result<()> {
    let buffer = Arc::new(Mutex::new(OutputBuffer::new(1024)));
    let publisher = OutputPublisher::new(
        PublishPolicy::Sample(0),
        PublishTargets { buffer: Some(Arc::clone(&buffer)), ..PublishTargets::default() },
        CancellationToken::new(),
    );

    for i in 0..8u32 {
        publisher.publish(Bytes::from(format!("{i}\n"))).await;
    }
    publisher.close().await;

    assert_eq!(publisher.dropped(), 0);
    assert_eq!(buffer.lock().lines().len(), 9);
    Ok(())
}

#[tokio::test]
async fn block_policy_respects_cancellation() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let publisher = Arc::new(OutputPublisher::new(
        PublishPolicy::Block,
        PublishTargets::default(),
        cancel.clone(),
    ));

    // Cancel up front: even if the queue ever fills, publish returns.
    cancel.cancel();
    publisher.publish(Bytes::from_static(b"x")).await;
    publisher.close().await;
    Ok(())
}

#[tokio::test]
async fn publish_after_close_is_noop() -> anyhow::Result<()> {
    let buffer = Arc::new(Mutex::new(OutputBuffer::new(64)));
    let publisher = OutputPublisher::new(
        PublishPolicy::DropOldest,
        PublishTargets { buffer: Some(Arc::clone(&buffer)), ..PublishTargets::default() },
        CancellationToken::new(),
    );

    publisher.close().await;
    publisher.publish(Bytes::from_static(b"late\n")).await;
    assert!(buffer.lock().is_empty());
    Ok(())
}
