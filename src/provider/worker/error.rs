//! Worker-specific error types.

use std::io;

use thiserror::Error;

use crate::error::{DbError, DbErrorKind};

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur during worker communication.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Worker pipes were not captured.
    #[error("worker {0} is not piped")]
    PipeMissing(&'static str),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to serialize request to JSON.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize response from JSON.
    #[error("failed to deserialize response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// Request timed out waiting for response.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Worker process exited unexpectedly.
    #[error("worker process exited unexpectedly")]
    WorkerExited,

    /// Response channel was closed (internal error).
    #[error("response channel closed unexpectedly")]
    ChannelClosed,

    /// The server rejected a statement.
    #[error("SQL error {number:?}: {message}")]
    Sql { number: Option<i32>, message: String },

    /// Database connection failed.
    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    /// Worker returned an error response.
    #[error("worker error: {message} (code: {code})")]
    Remote { code: String, message: String },
}

impl WorkerError {
    /// Create a remote error from an error response.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this error indicates the worker has exited.
    pub fn is_worker_exited(&self) -> bool {
        matches!(self, Self::WorkerExited | Self::ChannelClosed)
    }
}

impl From<WorkerError> for DbError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Sql { number, message } => DbError {
                number,
                message,
                kind: DbErrorKind::Native,
            },
            WorkerError::Timeout(_) => DbError::timeout(err.to_string()),
            WorkerError::SpawnFailed(_)
            | WorkerError::PipeMissing(_)
            | WorkerError::WriteFailed(_)
            | WorkerError::WorkerExited
            | WorkerError::ChannelClosed
            | WorkerError::ConnectionFailed(_) => DbError::connection(err.to_string()),
            _ => DbError::protocol(err.to_string()),
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
