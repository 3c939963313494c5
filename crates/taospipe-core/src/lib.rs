//! Taospipe Core - batched concurrent writes for TDengine
//!
//! Rows are rendered into insert fragments, packed into byte-budgeted
//! statements, and executed by a fixed worker pool behind a bounded queue.
//! [`Pipeline::await_drain`] blocks until every dispatched batch is applied.

pub mod buffer;
pub mod counter;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod render;
pub mod retry;
pub mod store;

// Re-exports for convenience
pub use buffer::{BatchBuffer, DEFAULT_MAX_BATCH_BYTES};
pub use counter::OutstandingCounter;
pub use error::{PipelineError, StoreError};
pub use logging::{IndicatifLogger, init_logging};
pub use pipeline::{DEFAULT_WORKERS, Pipeline, PipelineBuilder, PipelineState};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use queue::DispatchQueue;
pub use render::{INSERT_PREFIX, row_fragment, single_insert};
pub use retry::{
    DEFAULT_RETRY_INTERVAL, RetryPolicy, execute_until_accepted, execute_with_retry,
    query_with_retry,
};
pub use store::{Row, Store};
