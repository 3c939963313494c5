//! Asynchronous batch-write pipeline: buffer → bounded queue → worker pool.
//!
//! ```ignore
//! let pipeline = Pipeline::builder(store).workers(8).build()?;
//! pipeline.append_row("db", "meters", "d1001", &fields, Some(&tags))?;
//! pipeline.await_drain(); // every row appended so far is now in the store
//! pipeline.close();
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::buffer::{BatchBuffer, DEFAULT_MAX_BATCH_BYTES};
use crate::counter::OutstandingCounter;
use crate::error::{PipelineError, StoreError};
use crate::queue::DispatchQueue;
use crate::render::{self, INSERT_PREFIX};
use crate::retry::{self, DEFAULT_RETRY_INTERVAL, RetryPolicy};
use crate::store::{Row, Store};

/// Default number of worker threads
pub const DEFAULT_WORKERS: usize = 10;

/// Lifecycle of a [`Pipeline`] after it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    /// `await_drain` or `close` is waiting for outstanding batches
    Draining,
    Closed,
}

/// Configuration surface for a [`Pipeline`]; no threads exist until [`build`](Self::build).
pub struct PipelineBuilder<S> {
    store: S,
    workers: usize,
    queue_capacity: Option<usize>,
    max_batch_bytes: usize,
    retry_interval: Duration,
    show_sql: bool,
}

impl<S> std::fmt::Debug for PipelineBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("retry_interval", &self.retry_interval)
            .field("show_sql", &self.show_sql)
            .finish_non_exhaustive()
    }
}

impl<S: Store> PipelineBuilder<S> {
    fn new(store: S) -> Self {
        Self {
            store,
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            show_sql: false,
        }
    }

    /// Number of concurrent executor threads
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Statements that may wait ahead of the workers (defaults to the worker count)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Byte budget per batch statement, prefix included
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sleep between attempts of a failed batch
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Log every dispatched statement at debug level
    pub fn show_sql(mut self, show: bool) -> Self {
        self.show_sql = show;
        self
    }

    /// Validate the configuration and start the worker pool.
    pub fn build(self) -> Result<Pipeline<S>, PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        if self.max_batch_bytes <= INSERT_PREFIX.len() {
            return Err(PipelineError::Config(format!(
                "max_batch_bytes must exceed the {}-byte statement prefix",
                INSERT_PREFIX.len()
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(PipelineError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }

        let capacity = self.queue_capacity.unwrap_or(self.workers);
        let outstanding = Arc::new(OutstandingCounter::new());
        let queue = Arc::new(DispatchQueue::new(capacity, outstanding.clone()));
        let buffer = BatchBuffer::new(self.max_batch_bytes, queue.clone());
        let store = Arc::new(self.store);

        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let worker = Worker {
                id,
                store: store.clone(),
                queue: queue.clone(),
                outstanding: outstanding.clone(),
                retry_interval: self.retry_interval,
                show_sql: self.show_sql,
            };
            let spawned = std::thread::Builder::new()
                .name(format!("taospipe-worker-{id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Nothing was enqueued yet; stop the workers already running
                    queue.close();
                    for handle in handles {
                        join_worker(handle, "aborted startup");
                    }
                    return Err(PipelineError::Spawn(e));
                }
            }
        }

        log::info!(
            "pipeline started: workers={}, queue_capacity={capacity}, max_batch_bytes={}",
            self.workers,
            self.max_batch_bytes
        );

        Ok(Pipeline {
            store,
            buffer,
            queue,
            outstanding,
            workers: Mutex::new(handles),
            closed: AtomicBool::new(false),
            draining: AtomicUsize::new(0),
        })
    }
}

/// Long-lived executor: pop, execute until accepted, release the slot, decrement, repeat.
struct Worker<S> {
    id: usize,
    store: Arc<S>,
    queue: Arc<DispatchQueue>,
    outstanding: Arc<OutstandingCounter>,
    retry_interval: Duration,
    show_sql: bool,
}

impl<S: Store> Worker<S> {
    fn run(self) {
        log::debug!("worker {} started", self.id);
        while let Some(statement) = self.queue.pop() {
            if self.show_sql {
                log::debug!("worker {} executing: {statement}", self.id);
            }
            let rows = retry::execute_until_accepted(&*self.store, &statement, self.retry_interval);
            log::trace!("worker {}: {rows} rows affected", self.id);
            self.queue.complete();
            self.outstanding.decrement();
        }
        log::debug!("worker {} exiting", self.id);
    }
}

/// Join one worker, logging a panic instead of propagating it.
///
/// Returns `false` if the worker panicked.
fn join_worker(handle: JoinHandle<()>, phase: &str) -> bool {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            log::error!("{name} panicked during {phase}");
            false
        }
    }
}

/// Marks the pipeline as draining for as long as it lives.
struct DrainGuard<'a>(&'a AtomicUsize);

impl<'a> DrainGuard<'a> {
    fn enter(draining: &'a AtomicUsize) -> Self {
        draining.fetch_add(1, Ordering::SeqCst);
        Self(draining)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Batched, concurrent writer in front of a [`Store`].
///
/// Rows appended from any number of threads are packed into multi-row
/// `INSERT` statements of at most `max_batch_bytes` and executed by a fixed
/// pool of workers. Execution failures are retried until the store accepts
/// the batch; they never reach the caller. Use
/// [`await_drain`](Self::await_drain) as a barrier before reading back.
pub struct Pipeline<S: Store> {
    store: Arc<S>,
    buffer: BatchBuffer,
    queue: Arc<DispatchQueue>,
    outstanding: Arc<OutstandingCounter>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    draining: AtomicUsize,
}

impl<S: Store> std::fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("outstanding", &self.outstanding.get())
            .field("buffer", &self.buffer)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<S: Store> Pipeline<S> {
    pub fn builder(store: S) -> PipelineBuilder<S> {
        PipelineBuilder::new(store)
    }

    /// Render and buffer one row; may block on a full queue.
    pub fn append_row(
        &self,
        db: &str,
        super_table: &str,
        table: &str,
        fields: &Row,
        tags: Option<&Row>,
    ) -> Result<(), PipelineError> {
        let fragment = render::row_fragment(db, super_table, table, fields, tags);
        self.buffer.append(&fragment)
    }

    /// Buffer an already rendered fragment (must start with a space).
    pub fn append_fragment(&self, fragment: &str) -> Result<(), PipelineError> {
        self.buffer.append(fragment)
    }

    /// Dispatch the partial batch, if any. No-op once closed.
    pub fn flush(&self) -> Result<(), PipelineError> {
        self.buffer.flush()
    }

    /// Flush, then block until every dispatched batch has executed.
    ///
    /// A barrier only: the pipeline keeps running afterwards.
    pub fn await_drain(&self) {
        let _guard = DrainGuard::enter(&self.draining);
        if let Err(e) = self.buffer.flush() {
            log::error!("flush before drain failed: {e}");
        }
        self.outstanding.await_zero();
    }

    /// Drain, stop the workers and join them. Idempotent.
    ///
    /// Blocks without a timeout; against an unreachable store this waits
    /// for as long as the retries do.
    pub fn close(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        log::info!("closing pipeline: {} batches outstanding", self.outstanding.get());
        {
            let _guard = DrainGuard::enter(&self.draining);
            if let Err(e) = self.buffer.seal() {
                log::error!("flush before close failed: {e}");
            }
            self.outstanding.await_zero();
        }
        self.queue.close();
        for handle in workers.drain(..) {
            join_worker(handle, "shutdown");
        }
        self.closed.store(true, Ordering::SeqCst);
        log::info!("pipeline closed");
    }

    pub fn state(&self) -> PipelineState {
        if self.closed.load(Ordering::SeqCst) {
            PipelineState::Closed
        } else if self.draining.load(Ordering::SeqCst) > 0 {
            PipelineState::Draining
        } else {
            PipelineState::Running
        }
    }

    /// Batches enqueued but not yet executed
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Bytes of rows buffered but not yet dispatched
    pub fn pending_bytes(&self) -> usize {
        self.buffer.pending_bytes()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Insert one row right away, bypassing the buffer.
    pub fn insert_row(
        &self,
        db: &str,
        super_table: &str,
        table: &str,
        fields: &Row,
        tags: Option<&Row>,
        policy: &RetryPolicy,
    ) -> Result<u64, StoreError> {
        let sql = render::single_insert(db, super_table, table, fields, tags);
        self.execute_update(&sql, policy)
    }

    /// Run a statement synchronously; errors surface once `policy` gives up.
    pub fn execute_update(&self, sql: &str, policy: &RetryPolicy) -> Result<u64, StoreError> {
        retry::execute_with_retry(&*self.store, sql, policy)
    }

    /// Run a query synchronously. Not ordered after buffered writes; drain first.
    pub fn execute_query(&self, sql: &str, policy: &RetryPolicy) -> Result<Vec<Row>, StoreError> {
        retry::query_with_retry(&*self.store, sql, policy)
    }
}

impl<S: Store> Drop for Pipeline<S> {
    fn drop(&mut self) {
        self.close();
    }
}
