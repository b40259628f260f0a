//! The cached filesystem facade.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use futures::StreamExt as _;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt as _;

use crate::cache::stats::{CacheStats, ReadStats};
use crate::cache::store::{BeginRead, ContentStore};
use crate::error::{CacheError, SharedIoError};
use crate::fs::stream::ContentStream;
use crate::fs::{FsAccess, TokioFs};
use crate::watch::{ChangeKind, InvalidationWatcher};

/// Read-through content cache over a filesystem collaborator.
///
/// Buffered ([`read_file`](Self::read_file)) and streaming
/// ([`read_stream`](Self::read_stream)) reads consult the store before
/// touching the filesystem; concurrent first reads of the same path share a
/// single underlying read. Entries live until expired, either explicitly
/// ([`expire`](Self::expire)) or by a watched file changing on disk
/// ([`watch`](Self::watch)).
///
/// Instances are independent: each owns its store, counters, and watcher.
/// For the common single-pipeline case a process-wide instance is available
/// via [`FileCache::shared`].
pub struct FileCache<F: FsAccess = TokioFs> {
    store: ContentStore,
    stats: ReadStats,
    fs: F,
    watcher: Mutex<Option<InvalidationWatcher>>,
}

impl Default for FileCache<TokioFs> {
    fn default() -> Self {
        Self::new(TokioFs)
    }
}

impl FileCache<TokioFs> {
    /// The process-wide cache instance backed by the real filesystem.
    pub fn shared() -> &'static FileCache<TokioFs> {
        static SHARED: OnceLock<FileCache<TokioFs>> = OnceLock::new();
        SHARED.get_or_init(FileCache::default)
    }
}

impl<F: FsAccess> FileCache<F> {
    /// Create an empty cache reading through `fs`.
    pub fn new(fs: F) -> Self {
        Self {
            store: ContentStore::default(),
            stats: ReadStats::default(),
            fs,
            watcher: Mutex::new(None),
        }
    }

    /// Read the file at `path` as UTF-8 text, serving from cache when possible.
    ///
    /// A miss stores the content for subsequent calls; a failed read leaves
    /// nothing behind, so retrying hits the filesystem again. Concurrent
    /// callers for an uncached path attach to one underlying read and all
    /// receive its outcome.
    pub async fn read_file(&self, path: impl AsRef<Path>) -> Result<Arc<str>, CacheError> {
        let path = path.as_ref();
        match self.store.begin_read(path).await {
            BeginRead::Hit(content) => {
                self.stats.record_hit();
                Ok(content)
            }
            BeginRead::Join(shared) => {
                self.stats.record_hit();
                Ok(shared.await?)
            }
            BeginRead::Miss(ticket) => {
                self.stats.record_miss();
                tracing::debug!(path = %path.display(), "cache miss, reading file");
                match self.fs.read_to_string(path).await {
                    Ok(content) => {
                        let content: Arc<str> = Arc::from(content);
                        ticket.complete(Ok(Arc::clone(&content)));
                        Ok(content)
                    }
                    Err(err) => {
                        let err = SharedIoError::new(err);
                        ticket.complete(Err(err.clone()));
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Open a read stream over the file at `path`, serving from cache when
    /// possible.
    ///
    /// On a hit the returned stream replays the stored content; every call
    /// produces an independent stream. On a miss the collaborator's chunks
    /// are passed through untouched while a side-channel copy accumulates;
    /// the entry materializes only when the stream ends cleanly. A stream
    /// abandoned or failing mid-flight leaves no entry behind.
    pub async fn read_stream(&self, path: impl AsRef<Path>) -> Result<ContentStream<F>, CacheError> {
        let path = path.as_ref();
        match self.store.begin_read(path).await {
            BeginRead::Hit(content) => {
                self.stats.record_hit();
                Ok(ContentStream::replay(content))
            }
            BeginRead::Join(shared) => {
                self.stats.record_hit();
                Ok(ContentStream::join(shared))
            }
            BeginRead::Miss(ticket) => {
                self.stats.record_miss();
                tracing::debug!(path = %path.display(), "cache miss, streaming file");
                match self.fs.open_read_stream(path).await {
                    Ok(inner) => Ok(ContentStream::tap(inner, ticket)),
                    Err(err) => {
                        let err = SharedIoError::new(err);
                        ticket.complete(Err(err.clone()));
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Remove the entry for `path`. Returns whether one was present; absent
    /// paths are a no-op.
    pub fn expire(&self, path: impl AsRef<Path>) -> bool {
        self.store.remove(path.as_ref())
    }

    /// Concatenate the files at `paths` in order, with no separator.
    ///
    /// Each file goes through the buffered read path, so repeated inputs and
    /// later reads hit cache. Fails fast: the first failing read aborts the
    /// whole operation with that error and no partial result.
    pub async fn concat<P: AsRef<Path>>(&self, paths: &[P]) -> Result<String, CacheError> {
        let mut combined = String::new();
        for path in paths {
            combined.push_str(&self.read_file(path).await?);
        }
        Ok(combined)
    }

    /// Like [`concat`](Self::concat), applying `transform` to each
    /// `(path, content)` pair before joining.
    ///
    /// The transform sees one file at a time — its original path and that
    /// file's content only. Join order is input order.
    pub async fn concat_with<P: AsRef<Path>>(
        &self,
        paths: &[P],
        transform: impl Fn(&Path, &str) -> String,
    ) -> Result<String, CacheError> {
        let mut combined = String::new();
        for path in paths {
            let content = self.read_file(path).await?;
            combined.push_str(&transform(path.as_ref(), &content));
        }
        Ok(combined)
    }

    /// Copy `src` to `dest` using the cached streaming read.
    ///
    /// Creates `dest`'s parent directory (and intermediates) first; that
    /// failure is reported as [`CacheError::DirectoryCreation`] before any
    /// stream is opened. Resolves only after the sink completes. No cleanup
    /// is performed on failure — `dest` may be left truncated.
    pub async fn copy(
        &self,
        src: impl AsRef<Path>,
        dest: impl AsRef<Path>,
    ) -> Result<(), CacheError> {
        let (src, dest) = (src.as_ref(), dest.as_ref());
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs
                .ensure_dir(parent)
                .await
                .map_err(|source| CacheError::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut stream = self.read_stream(src).await?;
        let mut sink = self.fs.open_write_stream(dest).await?;
        while let Some(chunk) = stream.next().await {
            sink.write_all(&chunk?).await?;
        }
        sink.shutdown().await?;
        Ok(())
    }

    /// Snapshot the hit/miss counters, optionally zeroing them in the same
    /// step.
    pub fn stats(&self, reset: bool) -> CacheStats {
        self.stats.snapshot(reset)
    }

    /// Zero both hit/miss counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Whether `path` currently has a store entry (materialized or in flight).
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.store.contains(path.as_ref())
    }

    /// Every path currently in the store, in no particular order.
    pub fn cached_paths(&self) -> Vec<PathBuf> {
        self.store.cached_paths()
    }

    /// Number of entries currently in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Watch every currently-cached path for changes on disk.
    ///
    /// Each cached path's parent directory is registered with the platform
    /// watcher. When a registered file changes, its entry is expired and
    /// `observer` is invoked with the change kind and the exact path — in
    /// that order, so a read from the callback sees a fresh miss. Calling
    /// `watch` again rebuilds registration from the store's current contents
    /// and replaces the observer.
    pub fn watch<O>(&self, observer: O) -> Result<(), CacheError>
    where
        O: Fn(ChangeKind, &Path) + Send + Sync + 'static,
    {
        let mut watcher = InvalidationWatcher::new(self.store.clone(), Arc::new(observer))?;
        for path in self.store.cached_paths() {
            watcher.register(&path)?;
        }
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    /// Watched directory -> ordered list of watched file paths, for
    /// introspection. Empty when [`watch`](Self::watch) has not been called.
    pub fn watched(&self) -> HashMap<PathBuf, Vec<PathBuf>> {
        self.watcher
            .lock()
            .as_ref()
            .map(InvalidationWatcher::watched)
            .unwrap_or_default()
    }
}
