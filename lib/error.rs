//! Error types for cache operations.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by [`FileCache`](crate::fs::file_cache::FileCache) operations.
///
/// The cache is transparent to failure: I/O errors from the filesystem
/// collaborator are propagated verbatim, never swallowed or retried. The
/// cache only guarantees that no entry survives a failed read.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying read/write failure, propagated from the filesystem collaborator.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The destination's parent directory could not be created during a copy.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Failure registering paths with the filesystem watcher.
    #[error(transparent)]
    Watch(#[from] notify::Error),
}

/// A clonable [`std::io::Error`].
///
/// Shared in-flight reads fan a single failure out to every attached caller,
/// which requires the error to be `Clone`. `io::Error` is not, so the
/// original error is held behind an `Arc`; its [`ErrorKind`](std::io::ErrorKind)
/// and message are preserved through the round-trip back to `io::Error`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SharedIoError(Arc<std::io::Error>);

impl SharedIoError {
    pub(crate) fn new(err: std::io::Error) -> Self {
        Self(Arc::new(err))
    }

    /// The read driving a pending entry was dropped before completion.
    pub(crate) fn interrupted() -> Self {
        Self::new(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "in-flight read dropped before completion",
        ))
    }

    /// The kind of the underlying I/O error.
    #[must_use]
    pub fn kind(&self) -> std::io::ErrorKind {
        self.0.kind()
    }
}

impl From<SharedIoError> for std::io::Error {
    fn from(err: SharedIoError) -> Self {
        std::io::Error::new(err.0.kind(), err)
    }
}

impl From<SharedIoError> for CacheError {
    fn from(err: SharedIoError) -> Self {
        CacheError::Io(err.into())
    }
}
