//! Bounded work queue between the subscription manager and the workers.
//!
//! The queue is the pipeline's only backpressure point: `push` blocks while
//! the queue is at capacity, which in turn stalls frame intake and therefore
//! network reads. `close` starts a drain: producers are refused, consumers
//! keep receiving until the queue is empty.

use crate::error::{AlertError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reference capacity, in frames.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// How often blocked producers and consumers re-check for closure.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a timed pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    /// Nothing arrived within the timeout; the queue is still open.
    Empty,
    /// Closed and fully drained; no item will ever arrive.
    Drained,
}

struct QueueState {
    closed: AtomicBool,
    pushed: AtomicU64,
    popped: AtomicU64,
}

/// Bounded multi-producer, multi-consumer FIFO queue.
pub struct WorkQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    state: Arc<QueueState>,
    capacity: usize,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            state: Arc::clone(&self.state),
            capacity: self.capacity,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            state: Arc::new(QueueState {
                closed: AtomicBool::new(false),
                pushed: AtomicU64::new(0),
                popped: AtomicU64::new(0),
            }),
            capacity,
        }
    }

    /// Enqueue an item, blocking while the queue is full.
    ///
    /// Fails with `QueueClosed` if the queue is (or becomes) closed before
    /// space frees up.
    pub fn push(&self, item: T) -> Result<()> {
        let mut item = item;
        loop {
            if self.is_closed() {
                return Err(AlertError::QueueClosed);
            }
            match self.sender.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => {
                    self.state.pushed.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(returned)) => item = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(AlertError::QueueClosed),
            }
        }
    }

    /// Enqueue without blocking; fails with `QueueFull` at capacity.
    pub fn try_push(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(AlertError::QueueClosed);
        }
        match self.sender.try_send(item) {
            Ok(()) => {
                self.state.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(AlertError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(AlertError::QueueClosed),
        }
    }

    /// Dequeue an item, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => {
                self.state.popped.fetch_add(1, Ordering::Relaxed);
                Popped::Item(item)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                if self.is_closed() && self.receiver.is_empty() {
                    Popped::Drained
                } else {
                    Popped::Empty
                }
            }
        }
    }

    /// Dequeue an item, blocking until one arrives or the queue is drained.
    pub fn pop(&self) -> Option<T> {
        loop {
            match self.pop_timeout(POLL_INTERVAL) {
                Popped::Item(item) => return Some(item),
                Popped::Empty => continue,
                Popped::Drained => return None,
            }
        }
    }

    /// Stop accepting items. Items already queued remain poppable.
    ///
    /// Idempotent; returns true on the call that actually closed the queue.
    pub fn close(&self) -> bool {
        !self.state.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Closed and empty.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items accepted since creation.
    pub fn pushed(&self) -> u64 {
        self.state.pushed.load(Ordering::Relaxed)
    }

    /// Total items handed to consumers since creation.
    pub fn popped(&self) -> u64 {
        self.state.popped.load(Ordering::Relaxed)
    }

    /// Discard everything still queued, returning how many items were dropped.
    pub fn discard(&self) -> usize {
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
