//! Byte-budgeted accumulator turning row fragments into batch statements

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::PipelineError;
use crate::queue::DispatchQueue;
use crate::render::INSERT_PREFIX;

/// Default byte budget per batch statement (1 MiB)
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

struct State {
    /// Always starts with [`INSERT_PREFIX`]; empty means prefix only
    text: String,
    sealed: bool,
}

impl State {
    fn fresh_text() -> String {
        String::from(INSERT_PREFIX)
    }

    fn has_rows(&self) -> bool {
        self.text.len() > INSERT_PREFIX.len()
    }
}

/// Accumulates row fragments behind one lock and dispatches full batches.
///
/// A fragment that would push the statement to `max_batch_bytes` or beyond
/// first flushes what is buffered, then starts the next statement. A lone
/// fragment larger than the budget is dispatched whole.
///
/// Flushing enqueues while the lock is held, so a producer blocked on a full
/// queue also holds back other producers, and a drain that sees an empty
/// buffer knows every earlier row is already counted.
pub struct BatchBuffer {
    state: Mutex<State>,
    max_batch_bytes: usize,
    queue: Arc<DispatchQueue>,
}

impl std::fmt::Debug for BatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuffer")
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("pending_bytes", &self.pending_bytes())
            .finish_non_exhaustive()
    }
}

impl BatchBuffer {
    pub fn new(max_batch_bytes: usize, queue: Arc<DispatchQueue>) -> Self {
        Self {
            state: Mutex::new(State {
                text: State::fresh_text(),
                sealed: false,
            }),
            max_batch_bytes,
            queue,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one rendered row fragment, flushing first if it would not fit.
    pub fn append(&self, fragment: &str) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if state.sealed {
            return Err(PipelineError::Closed);
        }
        if state.text.len() + fragment.len() >= self.max_batch_bytes {
            self.dispatch(&mut state)?;
        }
        state.text.push_str(fragment);
        Ok(())
    }

    /// Dispatch buffered rows as one statement. No-op when empty or sealed.
    pub fn flush(&self) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if state.sealed {
            return Ok(());
        }
        self.dispatch(&mut state)
    }

    /// Dispatch what is buffered and refuse all further appends.
    ///
    /// Returns `false` if the buffer was already sealed.
    pub fn seal(&self) -> Result<bool, PipelineError> {
        let mut state = self.lock();
        if state.sealed {
            return Ok(false);
        }
        self.dispatch(&mut state)?;
        state.sealed = true;
        Ok(true)
    }

    fn dispatch(&self, state: &mut State) -> Result<(), PipelineError> {
        if !state.has_rows() {
            return Ok(());
        }
        let statement = std::mem::replace(&mut state.text, State::fresh_text());
        self.queue.push(statement)
    }

    /// Bytes buffered beyond the prefix
    pub fn pending_bytes(&self) -> usize {
        self.lock().text.len() - INSERT_PREFIX.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.lock().has_rows()
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }
}
