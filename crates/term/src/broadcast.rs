// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-blocking fan-out of output chunks to subscribers.
//!
//! Each subscriber owns a bounded channel; a full channel drops the chunk for
//! that subscriber only. The broadcaster also feeds a bounded line buffer so
//! late joiners can read a transcript view without replaying the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::ring::OutputBuffer;

/// Per-subscriber channel capacity.
const SUBSCRIBER_CAPACITY: usize = 128;

struct Inner {
    subscribers: HashMap<u64, mpsc::Sender<Bytes>>,
    closed: bool,
}

/// Fan-out hub owned by one session.
pub struct Broadcaster {
    inner: Mutex<Inner>,
    buffer: Mutex<OutputBuffer>,
    next_id: AtomicU64,
}

/// A live subscription; dropping it (or calling [`Subscription::cancel`])
/// detaches from the broadcaster.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    /// Next chunk, or `None` once the broadcaster closed this channel.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.inner.lock().subscribers.remove(&self.id);
        }
    }
}

impl Broadcaster {
    pub fn new(buffer_lines: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { subscribers: HashMap::new(), closed: false }),
            buffer: Mutex::new(OutputBuffer::new(buffer_lines)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a subscriber. After close this returns an already-closed
    /// channel whose cancel is a no-op.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        let mut inner = self.inner.lock();
        if inner.closed {
            drop(tx);
            return Subscription { id, rx, broadcaster: Weak::new() };
        }
        inner.subscribers.insert(id, tx);
        Subscription { id, rx, broadcaster: Arc::downgrade(self) }
    }

    /// Deliver a chunk to the transcript buffer and every subscriber.
    ///
    /// Never waits on a consumer: a full subscriber channel drops this chunk
    /// for that subscriber. No-op after close.
    pub fn broadcast(&self, chunk: Bytes) {
        let senders: Vec<(u64, mpsc::Sender<Bytes>)> = {
            let inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.subscribers.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        self.buffer.lock().append(&chunk);

        let mut gone: Vec<u64> = Vec::new();
        for (id, tx) in senders {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: skip this chunk for them.
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id),
            }
        }
        if !gone.is_empty() {
            let mut inner = self.inner.lock();
            for id in gone {
                inner.subscribers.remove(&id);
            }
        }
    }

    /// Close every subscriber channel. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Transcript view: all buffered lines.
    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().lines()
    }

    /// Transcript view: the most recent `max` lines.
    pub fn recent_lines(&self, max: usize) -> Vec<String> {
        self.buffer.lock().recent(max)
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
