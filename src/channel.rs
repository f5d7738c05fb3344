//! Bounded blocking FIFO of buffers between two tasks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::buffer::Buffer;

/// Default queue capacity between two tasks.
pub const DEFAULT_CAPACITY: usize = 2;

/// Error returned when pushing onto a closed channel.
///
/// Carries the rejected buffer back to the caller so it can be returned to
/// the pool (the `std::sync::mpsc::SendError` convention).
#[derive(Debug)]
pub struct SendError(pub Buffer);

/// Result of a non-blocking pop attempt.
#[derive(Debug)]
pub enum TryPop {
    /// An item was dequeued.
    Data(Buffer),
    /// The queue is currently empty but the channel is still open.
    Empty,
    /// The channel is closed and drained; no item will ever arrive.
    Done,
}

struct Inner {
    queue: VecDeque<Buffer>,
    closed: bool,
}

/// A bounded blocking FIFO of buffer handles with a one-shot finish signal.
///
/// `push` blocks while the queue is full, `pop` blocks while it is empty.
/// `close` is the sole end-of-stream indicator: after it, pushes are
/// rejected and pops drain the remaining items before returning `None`.
pub struct Channel {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl Channel {
    pub fn new(capacity: usize) -> Channel {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Channel {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocks until there is room, then enqueues `buf`.
    ///
    /// Returns the buffer inside `SendError` if the channel is (or becomes,
    /// while waiting) closed.
    pub fn push(&self, buf: Buffer) -> Result<(), SendError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(SendError(buf));
            }
            if inner.queue.len() < self.capacity {
                inner.queue.push_back(buf);
                self.not_empty.notify_one();
                return Ok(());
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Blocks until an item is available.
    ///
    /// Returns `None` iff the channel has been closed *and* drained.
    pub fn pop(&self) -> Option<Buffer> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(buf) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Some(buf);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Non-blocking pop used by fan-in collectors.
    pub fn try_pop(&self) -> TryPop {
        let mut inner = self.inner.lock().unwrap();
        match inner.queue.pop_front() {
            Some(buf) => {
                self.not_full.notify_one();
                TryPop::Data(buf)
            }
            None if inner.closed => TryPop::Done,
            None => TryPop::Empty,
        }
    }

    /// Marks the channel finished and wakes every waiter.
    ///
    /// Idempotent. Items already queued remain poppable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.closed {
            inner.closed = true;
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the queue, handing back any in-flight buffers.
    ///
    /// Used by the scheduler during teardown so aborted runs do not strand
    /// checked-out buffers inside channels.
    pub fn drain(&self) -> Vec<Buffer> {
        let mut inner = self.inner.lock().unwrap();
        self.not_full.notify_all();
        inner.queue.drain(..).collect()
    }
}
