//! Error types for the write pipeline and the store seam

/// Failure of a single statement attempt against the store.
///
/// The asynchronous write path never surfaces these; workers retry until the
/// store accepts the batch. The synchronous helpers return them after the
/// retry budget runs out.
#[derive(Debug)]
pub enum StoreError {
    /// Transport-level failure with optional HTTP status
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Store accepted the request but rejected the statement
    Server { code: i64, message: String },
    /// Response could not be decoded
    Decode(String),
    /// Store implementation panicked during an attempt
    Panicked(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Server { code, message } => write!(f, "server error {code:#x}: {message}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Panicked(msg) => write!(f, "store panicked: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Only consulted by bounded retry policies; the worker path retries
    /// every failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// Error from the pipeline façade itself (never from statement execution).
#[derive(Debug)]
pub enum PipelineError {
    /// `append_*` after `close()`
    Closed,
    /// Invalid builder configuration
    Config(String),
    /// Worker thread could not be started
    Spawn(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "pipeline is closed"),
            Self::Config(msg) => write!(f, "invalid pipeline config: {msg}"),
            Self::Spawn(e) => write!(f, "failed to spawn worker: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}
