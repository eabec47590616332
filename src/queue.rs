//! Bounded MPMC queue with blocking and non-blocking admission.
//!
//! A dedicated bounded FIFO: a `tokio::sync::Mutex<VecDeque<T>>` guarding the buffer,
//! plus two `Notify` handles standing in for a mutex+condvar pair, and an `AtomicBool`
//! shutdown flag that wakes every waiter exactly once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::QueueError;

struct Inner<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    closed: AtomicBool,
}

/// A bounded, multi-producer multi-consumer queue shared via `Arc` between stage
/// workers.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Queue {
            inner: Arc::new(Inner {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                not_empty: Notify::new(),
                not_full: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Blocking push: waits for free capacity. Returns `QueueError::Closed` if the
    /// queue is closed while waiting or before the call starts.
    pub async fn push(&self, item: T) -> Result<(), QueueError> {
        loop {
            if self.is_closed() {
                return Err(QueueError::Closed);
            }
            {
                let mut buf = self.inner.buf.lock().await;
                if buf.len() < self.inner.capacity {
                    buf.push_back(item);
                    self.inner.not_empty.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                _ = self.inner.not_full.notified() => {}
                _ = self.wait_closed() => return Err(QueueError::Closed),
            }
        }
    }

    /// Non-blocking push used by the admission path.
    pub async fn try_push(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let mut buf = self.inner.buf.lock().await;
        if buf.len() >= self.inner.capacity {
            return Err(QueueError::Full);
        }
        buf.push_back(item);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Blocking pop: waits for an item. Returns `None` once the queue is closed and
    /// drained, so callers drain remaining items before observing shutdown.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut buf = self.inner.buf.lock().await;
                if let Some(item) = buf.pop_front() {
                    self.inner.not_full.notify_one();
                    return Some(item);
                }
                if self.is_closed() {
                    return None;
                }
            }
            tokio::select! {
                _ = self.inner.not_empty.notified() => {}
                _ = self.wait_closed() => {
                    let mut buf = self.inner.buf.lock().await;
                    return buf.pop_front();
                }
            }
        }
    }

    /// Closes the queue and wakes every waiter. Idempotent. Queued items already
    /// present remain poppable until drained.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.not_empty.notify_waiters();
            self.inner.not_full.notify_waiters();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.buf.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn wait_closed(&self) {
        while !self.is_closed() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
