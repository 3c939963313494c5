//! Bounded dispatch queue between producers and the worker pool.
//!
//! `Mutex<VecDeque> + Condvar` pair: producers wait on `not_full`, workers
//! wait on `not_empty`. A statement holds its slot from `push` until the
//! worker reports it with `complete`, so capacity bounds queued plus
//! executing statements. It is the only backpressure in the write path.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::counter::OutstandingCounter;
use crate::error::PipelineError;

struct State {
    items: VecDeque<String>,
    /// Popped by a worker, not yet completed
    in_flight: usize,
    closed: bool,
}

impl State {
    fn occupied(&self) -> usize {
        self.items.len() + self.in_flight
    }
}

/// Bounded FIFO of ready-to-execute batch statements.
///
/// Every successful [`push`](DispatchQueue::push) increments the shared
/// [`OutstandingCounter`] while still holding the queue lock, so a worker can
/// never dequeue a statement that has not been counted yet.
pub struct DispatchQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    outstanding: Arc<OutstandingCounter>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl DispatchQueue {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, outstanding: Arc<OutstandingCounter>) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                in_flight: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            outstanding,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a statement, blocking while every slot is queued or in flight.
    ///
    /// Fails only if the queue was closed; the statement is then neither
    /// enqueued nor counted.
    pub fn push(&self, statement: String) -> Result<(), PipelineError> {
        let mut state = self.lock();
        while state.occupied() >= self.capacity && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(PipelineError::Closed);
        }
        state.items.push_back(statement);
        self.outstanding.increment();
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the next statement, blocking while empty.
    ///
    /// The statement keeps its slot until [`complete`](Self::complete).
    /// Returns `None` once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<String> {
        let mut state = self.lock();
        loop {
            if let Some(statement) = state.items.pop_front() {
                state.in_flight += 1;
                return Some(statement);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Release the slot of a statement returned by [`pop`](Self::pop).
    pub fn complete(&self) {
        let mut state = self.lock();
        debug_assert!(state.in_flight > 0, "complete without a popped statement");
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.not_full.notify_one();
    }

    /// Stop accepting statements and wake every blocked producer and worker.
    ///
    /// Statements already queued are still handed out by [`pop`](Self::pop).
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statements popped but not yet completed
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
