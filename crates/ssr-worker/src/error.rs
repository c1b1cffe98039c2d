//! Error types for the render worker.
//!
//! Every failure a caller of [`RenderWorker`](crate::RenderWorker) can observe
//! is a variant of [`WorkerError`]. Failures are always scoped to the call that
//! produced them; only [`WorkerError::WorkerStopped`] reflects the state of the
//! renderer process as a whole.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the render worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    // Construction errors
    #[error("Invalid worker configuration: {message}")]
    Config { message: String },

    #[error("Failed to spawn renderer {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {0:?} waiting for the renderer to become ready")]
    StartupTimeout(Duration),

    // Per-call errors
    #[error("Failed to encode render request: {message}")]
    EncodingFailure {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Failed to write render request: {source}")]
    TransportWrite {
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Render {
        message: String,
        /// Stack trace reported by the renderer, when it sent one.
        stack: Option<String>,
    },

    #[error("Render call was canceled")]
    Canceled,

    #[error("Render call exceeded its deadline")]
    DeadlineExceeded,

    #[error("Request id {0} is already pending")]
    DuplicateRequestId(String),

    // Lifecycle errors
    #[error("ssr worker stopped")]
    WorkerStopped,
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::EncodingFailure {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::TransportWrite { source: err }
    }
}

impl WorkerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        WorkerError::Config {
            message: message.into(),
        }
    }

    /// Whether the caller's own cancellation or deadline ended the call.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WorkerError::Canceled | WorkerError::DeadlineExceeded)
    }

    /// Whether the renderer process is (or is becoming) unavailable.
    ///
    /// A write failure usually means the pipe broke because the child exited;
    /// the exit watcher will close the worker independently.
    pub fn is_worker_gone(&self) -> bool {
        matches!(
            self,
            WorkerError::WorkerStopped | WorkerError::TransportWrite { .. }
        )
    }

    /// Map to the HTTP status a serving layer should answer with.
    ///
    /// - 503: renderer unavailable
    /// - 504: deadline exceeded
    /// - 499: caller went away (nginx convention)
    /// - 500: everything else
    pub fn http_status_code(&self) -> u16 {
        match self {
            WorkerError::WorkerStopped
            | WorkerError::TransportWrite { .. }
            | WorkerError::StartupTimeout(_) => 503,

            WorkerError::DeadlineExceeded => 504,

            WorkerError::Canceled => 499,

            _ => 500,
        }
    }
}
