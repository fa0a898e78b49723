// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue-backed append-only file logger.
//!
//! One background task per file drains a bounded queue, encodes items, and
//! flushes on a byte threshold or a periodic tick. Producers choose between
//! blocking backpressure and drop-oldest when the queue is full. Close drains
//! everything still queued before releasing the file.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait for the worker to make room.
    Block,
    /// Evict the oldest queued item to make room.
    DropOldest,
}

/// Tuning knobs for one logger instance.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub flush_interval: Duration,
    pub flush_threshold: usize,
    pub capacity: usize,
    pub policy: BackpressurePolicy,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            flush_threshold: 4096,
            capacity: 256,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

/// Item encoder. `None` (or empty bytes) skips the item entirely.
pub type Encoder<T> = Box<dyn Fn(&T) -> Option<Bytes> + Send + Sync>;

/// Counters exposed for observability.
#[derive(Debug, Clone)]
pub struct LoggerStats {
    pub path: PathBuf,
    pub dropped: u64,
    pub blocked: u64,
    pub last_flush: Duration,
    pub last_blocked: Duration,
}

struct Shared<T> {
    path: PathBuf,
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    /// Signals the worker that items (or close) are pending.
    items: Notify,
    /// Signals blocked producers that room was made.
    space: Notify,
    closed: std::sync::atomic::AtomicBool,
    dropped: AtomicU64,
    blocked: AtomicU64,
    last_flush_us: AtomicU64,
    last_blocked_us: AtomicU64,
}

/// Asynchronous append-only file logger for items of type `T`.
pub struct AsyncFileLogger<T> {
    shared: Arc<Shared<T>>,
    policy: BackpressurePolicy,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> AsyncFileLogger<T> {
    /// Start the background worker over an already-open append handle.
    pub fn new(
        path: impl Into<PathBuf>,
        file: std::fs::File,
        config: LoggerConfig,
        encoder: Encoder<T>,
    ) -> Self {
        let shared = Arc::new(Shared {
            path: path.into(),
            queue: Mutex::new(VecDeque::new()),
            capacity: config.capacity.max(1),
            items: Notify::new(),
            space: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            last_flush_us: AtomicU64::new(0),
            last_blocked_us: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = tokio::spawn(run_worker(worker_shared, file, config.clone(), encoder));

        Self { shared, policy: config.policy, worker: Mutex::new(Some(handle)) }
    }

    /// Enqueue one item according to the backpressure policy.
    ///
    /// No-op once the logger is closed.
    pub async fn write(&self, item: T) {
        match self.policy {
            BackpressurePolicy::DropOldest => self.write_drop_oldest(item),
            BackpressurePolicy::Block => self.write_blocking(item).await,
        }
    }

    fn write_drop_oldest(&self, item: T) {
        if self.is_closed() {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(item);
        }
        self.shared.items.notify_one();
    }

    async fn write_blocking(&self, item: T) {
        let mut item = Some(item);
        let mut counted = false;
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if self.is_closed() {
                    return;
                }
                if queue.len() < self.shared.capacity {
                    if let Some(item) = item.take() {
                        queue.push_back(item);
                    }
                    drop(queue);
                    self.shared.items.notify_one();
                    return;
                }
            }

            if !counted {
                counted = true;
                self.shared.blocked.fetch_add(1, Ordering::Relaxed);
            }

            let notified = self.shared.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Re-check under the registration so a concurrent pop or close
            // cannot strand this producer.
            if self.is_closed() || self.shared.queue.lock().len() < self.shared.capacity {
                continue;
            }
            let waited = Instant::now();
            notified.await;
            self.shared
                .last_blocked_us
                .store(waited.elapsed().as_micros() as u64, Ordering::Relaxed);
        }
    }

    /// Stop accepting items, drain the queue, flush, and close the file.
    ///
    /// Idempotent; concurrent callers after the first return immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.items.notify_waiters();
        self.shared.space.notify_waiters();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!(path = %self.shared.path.display(), "logger worker panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn stats(&self) -> LoggerStats {
        LoggerStats {
            path: self.shared.path.clone(),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            blocked: self.shared.blocked.load(Ordering::Relaxed),
            last_flush: Duration::from_micros(self.shared.last_flush_us.load(Ordering::Relaxed)),
            last_blocked: Duration::from_micros(
                self.shared.last_blocked_us.load(Ordering::Relaxed),
            ),
        }
    }
}

impl<T> Drop for AsyncFileLogger<T> {
    fn drop(&mut self) {
        // Dropping without close still lets the worker drain and exit.
        self.shared.closed.store(true, Ordering::Release);
        self.shared.items.notify_waiters();
        self.shared.space.notify_waiters();
    }
}

async fn run_worker<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    mut file: std::fs::File,
    config: LoggerConfig,
    encoder: Encoder<T>,
) {
    let mut pending: Vec<u8> = Vec::with_capacity(config.flush_threshold);
    let mut tick = tokio::time::interval(config.flush_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.reset(); // skip the immediate first tick

    loop {
        let batch: Vec<T> = {
            let mut queue = shared.queue.lock();
            queue.drain(..).collect()
        };

        if !batch.is_empty() {
            shared.space.notify_waiters();
            for item in &batch {
                if let Some(bytes) = encoder(item) {
                    if !bytes.is_empty() {
                        pending.extend_from_slice(&bytes);
                    }
                }
            }
            if pending.len() >= config.flush_threshold {
                flush(&shared, &mut file, &mut pending);
            }
            continue;
        }

        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        let notified = shared.items.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        // Closing or enqueueing between the drain above and this point must
        // not leave the worker parked.
        if shared.closed.load(Ordering::Acquire) || !shared.queue.lock().is_empty() {
            continue;
        }

        tokio::select! {
            _ = notified => {}
            _ = tick.tick() => {
                if !pending.is_empty() {
                    flush(&shared, &mut file, &mut pending);
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(&shared, &mut file, &mut pending);
    }
    if let Err(e) = file.flush() {
        warn!(path = %shared.path.display(), "final flush failed: {e}");
    }
    shared.space.notify_waiters();
}

fn flush<T>(shared: &Shared<T>, file: &mut std::fs::File, pending: &mut Vec<u8>) {
    let started = Instant::now();
    if let Err(e) = file.write_all(pending) {
        warn!(path = %shared.path.display(), "log write failed: {e}");
    } else if let Err(e) = file.flush() {
        warn!(path = %shared.path.display(), "log flush failed: {e}");
    }
    pending.clear();
    shared.last_flush_us.store(started.elapsed().as_micros() as u64, Ordering::Relaxed);
}

#[cfg(test)]
#[path = "logger_tests.rs"]
mod tests;
