use thiserror::Error;

/// Error taxonomy for the sync engine (§7).
///
/// Per-action errors are recovered locally by the executor — logged, recorded
/// in an `OperationRecord`, reflected in the path's `SyncState` — and never
/// abort a run. Only `Fatal` and `Cancelled` do.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("state store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether this error should be retried under the executor's backoff policy (§4.G).
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientIo(_) | EngineError::Timeout(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => EngineError::NotFound(err.to_string()),
            PermissionDenied => EngineError::PermissionDenied(err.to_string()),
            _ => EngineError::TransientIo(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(err: r2d2::Error) -> Self {
        EngineError::Store(format!("failed to get database connection: {}", err))
    }
}

impl From<aws_sdk_s3::Error> for EngineError {
    fn from(err: aws_sdk_s3::Error) -> Self {
        EngineError::TransientIo(err.to_string())
    }
}

impl<E> From<aws_sdk_s3::error::SdkError<E>> for EngineError
where
    E: std::fmt::Debug,
{
    fn from(err: aws_sdk_s3::error::SdkError<E>) -> Self {
        EngineError::TransientIo(format!("{:?}", err))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
