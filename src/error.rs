//! Error types for the orchestration core.

use crate::pipeline::Timing;

/// Top-level error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum BlackboxError {
    /// Transport-level failure: missing path, worker returned `{error: ...}`.
    #[error("transport error ({service}): {0}", service = .0.as_str())]
    Transport(TransportErrorKind),

    /// A per-stage or per-call deadline expired.
    #[error("timeout after {elapsed_secs:.3}s (budget {budget_secs:.3}s) in {stage}")]
    Timeout {
        /// Name of the stage or call that timed out.
        stage: String,
        /// Configured budget for the stage.
        budget_secs: f64,
        /// Actual elapsed time when the timeout fired.
        elapsed_secs: f64,
    },

    /// A worker returned a structured error from its own `{error: ...}` field.
    #[error("worker error ({service}): {message}")]
    Worker {
        /// Which worker (`asr`, `llm`, `tts`) produced the error.
        service: String,
        /// The worker's own error message.
        message: String,
    },

    /// Context & side-effect store failure.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Configuration failure: missing/invalid value, unknown field.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error not otherwise classified.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed transport JSON that could not be recovered by retrying the poll.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Which half of a transport round-trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The `<service>_in`/`<service>_out` directory or file is missing.
    PathMissing,
    /// The response file never produced a parseable document before the deadline.
    Unresponsive,
}

impl TransportErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::PathMissing => "path missing",
            TransportErrorKind::Unresponsive => "unresponsive",
        }
    }
}

/// Convenience result type for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, BlackboxError>;

/// A pipeline failure paired with the timing collected before it occurred.
///
/// Per-stage functions return plain `BlackboxError`; the coordinator is the
/// only place that attaches partial timing, since only it knows which stages
/// already ran.
#[derive(Debug, thiserror::Error)]
#[error("pipeline failed at stage `{stage}`: {source}")]
pub struct PipelineError {
    /// Name of the stage that failed (`asr`, `llm`, `tts`, ...).
    pub stage: String,
    /// The underlying error.
    #[source]
    pub source: BlackboxError,
    /// Timing for every stage that completed before the failure, plus `total`.
    pub timing: Timing,
}

/// Errors from executing a single function call (side effect) during stage 4.
///
/// Never escapes the coordinator as a pipeline failure — logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    /// No handler is registered for this function name.
    #[error("no handler registered for function `{0}`")]
    Unknown(String),

    /// The handler's required arguments were missing or malformed.
    #[error("invalid arguments for `{name}`: {message}")]
    InvalidArguments {
        /// Function name.
        name: String,
        /// What was wrong with `arguments`.
        message: String,
    },

    /// The handler itself failed (e.g. the store rejected the write).
    #[error("handler for `{name}` failed: {source}")]
    HandlerFailed {
        /// Function name.
        name: String,
        /// Underlying cause.
        #[source]
        source: BlackboxError,
    },
}
