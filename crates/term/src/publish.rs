// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single consumer that fans a session's output to its logger, line buffer,
//! and subscriber bus under a configurable backpressure policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::broadcast::Broadcaster;
use crate::ring::OutputBuffer;
use crate::transcript::SessionLogger;

/// Backpressure policy for the publisher's input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPolicy {
    /// Wait for room, waking on the session's cancellation token.
    Block,
    /// Evict the oldest queued chunk.
    DropOldest,
    /// Drop the incoming chunk.
    DropNewest,
    /// Deliver one chunk in `k` (drop-oldest for the kept ones); `k <= 1`
    /// delivers everything.
    Sample(u64),
    /// Block with a larger queue.
    Grow,
}

/// Queue capacity defaults; Grow multiplies the base.
const BASE_CAPACITY: usize = 256;
const GROW_FACTOR: usize = 4;

/// Delivery targets, each optional.
#[derive(Default)]
pub struct PublishTargets {
    pub logger: Option<Arc<SessionLogger>>,
    pub buffer: Option<Arc<Mutex<OutputBuffer>>>,
    pub bus: Option<Arc<Broadcaster>>,
}

struct Shared {
    queue: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    items: Notify,
    space: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Owner of the consumer task.
pub struct OutputPublisher {
    shared: Arc<Shared>,
    policy: PublishPolicy,
    cancel: CancellationToken,
    sample_seq: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OutputPublisher {
    /// Spawn the consumer over the given targets.
    ///
    /// `cancel` is the owning session's token; Block-policy producers stop
    /// waiting when it fires.
    pub fn new(policy: PublishPolicy, targets: PublishTargets, cancel: CancellationToken) -> Self {
        let capacity = match policy {
            PublishPolicy::Grow => BASE_CAPACITY * GROW_FACTOR,
            _ => BASE_CAPACITY,
        };
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            items: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = tokio::spawn(run_consumer(worker_shared, targets));

        Self {
            shared,
            policy,
            cancel,
            sample_seq: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Hand a chunk to the consumer under the configured policy.
    pub async fn publish(&self, chunk: Bytes) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        match self.policy {
            PublishPolicy::Block | PublishPolicy::Grow => self.publish_blocking(chunk).await,
            PublishPolicy::DropOldest => self.publish_drop_oldest(chunk),
            PublishPolicy::DropNewest => {
                let mut queue = self.shared.queue.lock();
                if queue.len() >= self.shared.capacity {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                queue.push_back(chunk);
                drop(queue);
                self.shared.items.notify_one();
            }
            PublishPolicy::Sample(k) => {
                if k > 1 {
                    let seq = self.sample_seq.fetch_add(1, Ordering::Relaxed);
                    if seq % k != 0 {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
                self.publish_drop_oldest(chunk);
            }
        }
    }

    fn publish_drop_oldest(&self, chunk: Bytes) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(chunk);
        }
        self.shared.items.notify_one();
    }

    async fn publish_blocking(&self, chunk: Bytes) {
        let mut chunk = Some(chunk);
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if self.shared.closed.load(Ordering::Acquire) {
                    return;
                }
                if queue.len() < self.shared.capacity {
                    if let Some(chunk) = chunk.take() {
                        queue.push_back(chunk);
                    }
                    drop(queue);
                    self.shared.items.notify_one();
                    return;
                }
            }

            let notified = self.shared.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.closed.load(Ordering::Acquire)
                || self.shared.queue.lock().len() < self.shared.capacity
            {
                continue;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Drain the queue, then close the bus and the logger. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.items.notify_waiters();
        self.shared.space.notify_waiters();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.await.is_err() {
                warn!("output publisher consumer panicked");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

async fn run_consumer(shared: Arc<Shared>, targets: PublishTargets) {
    loop {
        let chunk = {
            let mut queue = shared.queue.lock();
            queue.pop_front()
        };

        match chunk {
            Some(chunk) => {
                shared.space.notify_waiters();
                deliver(&targets, chunk).await;
            }
            None => {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                let notified = shared.items.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if shared.closed.load(Ordering::Acquire) || !shared.queue.lock().is_empty() {
                    continue;
                }
                notified.await;
            }
        }
    }

    if let Some(bus) = &targets.bus {
        bus.close();
    }
    if let Some(logger) = &targets.logger {
        logger.close().await;
    }
}

async fn deliver(targets: &PublishTargets, chunk: Bytes) {
    if let Some(logger) = &targets.logger {
        logger.write(chunk.clone()).await;
    }
    if let Some(buffer) = &targets.buffer {
        buffer.lock().append(&chunk);
    }
    if let Some(bus) = &targets.bus {
        bus.broadcast(chunk);
    }
}

#[cfg(test)]
#[path = "publish_tests.rs"]
mod tests;
