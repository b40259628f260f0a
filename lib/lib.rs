//! Read-through content cache for build-pipeline file I/O.
//!
//! Callers request file contents (buffered or streamed); the cache serves a
//! previously-read copy when available, otherwise reads from the underlying
//! filesystem and remembers the result. Entries can be expired on demand or
//! automatically when the underlying file changes on disk.

/// Caching primitives: the content store and hit/miss accounting.
pub mod cache;
/// Error types.
pub mod error;
/// Filesystem collaborators and the cached read/concat/copy surface.
pub mod fs;
/// Change-driven cache invalidation.
pub mod watch;

pub use cache::stats::CacheStats;
pub use error::{CacheError, SharedIoError};
pub use fs::file_cache::FileCache;
pub use fs::stream::ContentStream;
pub use fs::{FsAccess, TokioFs};
pub use watch::ChangeKind;
