//! Requests waiting for pool capacity.
//!
//! A waiter is resolved exactly once: handed a connection, granted a permit
//! to create one, or failed. The pool decides resolutions while holding its
//! lock and collects them as [`Delivery`] values; they are only carried out
//! after the lock is released, so responders never run under it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::PoolError;

/// Outcome handed to a waiter.
pub(crate) enum Handoff<T> {
    /// An idle connection, already checked for staleness.
    Connection(T),
    /// Capacity was reserved; the waiter creates the connection itself.
    Permit { generation: u64 },
    /// The request failed.
    Failed(PoolError),
}

/// Single-value rendezvous for a blocked thread.
pub(crate) struct Slot<T> {
    value: Mutex<Option<Handoff<T>>>,
    filled: Condvar,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
            filled: Condvar::new(),
        })
    }

    fn fill(&self, handoff: Handoff<T>) {
        let mut value = self.value.lock();
        *value = Some(handoff);
        self.filled.notify_one();
    }

    /// Block until filled or `deadline` passes. `None` means timed out.
    pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> Option<Handoff<T>> {
        let mut value = self.value.lock();
        loop {
            if let Some(handoff) = value.take() {
                return Some(handoff);
            }
            match deadline {
                Some(deadline) => {
                    if self.filled.wait_until(&mut value, deadline).timed_out() {
                        return value.take();
                    }
                }
                None => self.filled.wait(&mut value),
            }
        }
    }

    /// Block until filled.
    pub(crate) fn wait(&self) -> Handoff<T> {
        let mut value = self.value.lock();
        loop {
            if let Some(handoff) = value.take() {
                return handoff;
            }
            self.filled.wait(&mut value);
        }
    }
}

/// Callback resolution for non-blocking waiters.
pub(crate) type Callback<T> = Box<dyn FnOnce(Handoff<T>) + Send + 'static>;

/// How a waiter is told its outcome.
pub(crate) enum Responder<T> {
    Blocking(Arc<Slot<T>>),
    Callback(Callback<T>),
}

impl<T> Responder<T> {
    fn respond(self, handoff: Handoff<T>) {
        match self {
            Self::Blocking(slot) => slot.fill(handoff),
            Self::Callback(callback) => callback(handoff),
        }
    }
}

/// A resolution decided under the pool lock, carried out after it.
pub(crate) struct Delivery<T> {
    responder: Responder<T>,
    handoff: Handoff<T>,
}

impl<T> Delivery<T> {
    pub(crate) fn new(responder: Responder<T>, handoff: Handoff<T>) -> Self {
        Self { responder, handoff }
    }

    pub(crate) fn deliver(self) {
        self.responder.respond(self.handoff);
    }
}

pub(crate) struct Waiter<T> {
    pub(crate) id: u64,
    pub(crate) deadline: Option<Instant>,
    pub(crate) enqueued_at: Instant,
    pub(crate) responder: Responder<T>,
}

impl<T> Waiter<T> {
    pub(crate) fn resolve(self, handoff: Handoff<T>) -> Delivery<T> {
        Delivery::new(self.responder, handoff)
    }
}

/// FIFO queue of waiters.
pub(crate) struct WaiterQueue<T> {
    queue: VecDeque<Waiter<T>>,
    next_id: u64,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append a waiter, returning its id.
    pub(crate) fn push(&mut self, deadline: Option<Instant>, responder: Responder<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(Waiter {
            id,
            deadline,
            enqueued_at: Instant::now(),
            responder,
        });
        id
    }

    pub(crate) fn pop_front(&mut self) -> Option<Waiter<T>> {
        self.queue.pop_front()
    }

    /// Remove the waiter with `id`. `None` if it was already resolved.
    pub(crate) fn remove(&mut self, id: u64) -> Option<Waiter<T>> {
        let index = self.queue.iter().position(|w| w.id == id)?;
        self.queue.remove(index)
    }

    /// Remove and return every waiter.
    pub(crate) fn drain(&mut self) -> Vec<Waiter<T>> {
        self.queue.drain(..).collect()
    }

    /// Remove and return waiters whose deadline is at or before `now`.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<Waiter<T>> {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for waiter in self.queue.drain(..) {
            if waiter.deadline.is_some_and(|d| d <= now) {
                expired.push(waiter);
            } else {
                kept.push_back(waiter);
            }
        }
        self.queue = kept;
        expired
    }

    /// Earliest deadline among queued waiters.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().filter_map(|w| w.deadline).min()
    }
}
