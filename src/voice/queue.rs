//! Playback buffer between the receive and playback loops
//!
//! A strict FIFO of opaque audio frames. The lock is held only for the
//! enqueue/dequeue instant, never across an await or device call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;

/// FIFO of decoded model audio awaiting playback
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: Mutex<VecDeque<Bytes>>,
    limit: Option<usize>,
    closed: AtomicBool,
    available: Notify,
    space: Notify,
}

impl PlaybackQueue {
    /// Unbounded queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that holds at most `limit` frames; `push` waits for space
    #[must_use]
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Queue with an optional bound
    #[must_use]
    pub fn with_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::new, Self::bounded)
    }

    /// Append a frame
    ///
    /// Returns `false` if the queue was closed and the frame was dropped.
    pub async fn push(&self, frame: Bytes) -> bool {
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            if self.is_closed() {
                return false;
            }

            {
                let mut frames = self.lock();
                if self.limit.is_none_or(|limit| frames.len() < limit) {
                    frames.push_back(frame);
                    drop(frames);
                    self.available.notify_one();
                    return true;
                }
            }

            space.await;
        }
    }

    /// Remove and return the oldest frame, waiting while the queue is empty
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let available = self.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            let frame = self.lock().pop_front();
            if let Some(frame) = frame {
                self.space.notify_one();
                return Some(frame);
            }

            if self.is_closed() {
                return None;
            }

            available.await;
        }
    }

    /// Drop every queued frame, returning how many were discarded
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut frames = self.lock();
            let dropped = frames.len();
            frames.clear();
            dropped
        };
        self.space.notify_waiters();
        dropped
    }

    /// Close the queue; waiting producers and consumers wake up
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
        self.space.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no frames are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Bytes>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
