//! Error taxonomy for the engine.
//!
//! Every variant here maps directly onto a row of the error table: trigger
//! and recovery policy are documented at the call site that raises it, not
//! here, since the same variant is sometimes fatal and sometimes retryable
//! depending on who catches it (see [`crate::retry`]).

use crate::Version;

/// Convenience alias used throughout the crate.
pub type DeltaResult<T> = Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("storage error on {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: object_store::Error,
    },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("version mismatch writing {path}")]
    VersionMismatch { path: String },

    #[error(
        "concurrent writer won the race: expected version {expected_version:?}, actual version \
         {actual_version}. Refresh and retry."
    )]
    Concurrency {
        /// `None` means no commit existed yet when the conflicting write
        /// was attempted (the bootstrap-race case); `Some(v)` means the
        /// writer had observed version `v`.
        expected_version: Option<Version>,
        actual_version: Version,
    },

    #[error("operation aborted")]
    Abort,

    #[error("corrupt delta log entry at {path}: {reason}")]
    Corruption { path: String, reason: String },

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("internal error: {0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl Into<String>) -> Self {
        Error::Generic(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn storage(path: impl Into<String>, source: object_store::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for errors the retry engine treats as retryable by default.
    ///
    /// Only [`Error::Concurrency`] is retryable out of the box; everything
    /// else is surfaced to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Concurrency { .. })
    }
}

impl From<object_store::Error> for Error {
    fn from(source: object_store::Error) -> Self {
        match &source {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path.clone()),
            object_store::Error::AlreadyExists { path, .. } => Error::VersionMismatch {
                path: path.clone(),
            },
            object_store::Error::Precondition { path, .. } => Error::VersionMismatch {
                path: path.clone(),
            },
            _ => Error::Storage {
                path: String::new(),
                source,
            },
        }
    }
}
