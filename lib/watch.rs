//! Change-driven cache invalidation.
//!
//! Registers the parent directories of cached paths with a filesystem
//! watcher. When a registered file changes on disk its store entry is
//! removed first, then the observer is notified, so a read issued from the
//! observer callback already sees a fresh miss.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::cache::store::ContentStore;

/// The kind of filesystem change reported to a watch observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The watched file's content changed (modified, or replaced in place).
    Changed,
    /// The watched file was removed.
    Removed,
}

impl ChangeKind {
    /// The event name as reported to observers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked after a watched file's cache entry has been expired.
pub(crate) type Observer = Arc<dyn Fn(ChangeKind, &Path) + Send + Sync>;

/// Watched directory -> ordered list of watched file paths under it.
///
/// Registration is additive only; there is no unregister path. Watching the
/// same directory for multiple files accumulates the per-directory list.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    by_dir: scc::HashMap<PathBuf, Vec<PathBuf>>,
}

impl WatchRegistry {
    /// Record `file` under `dir`. Returns `true` if `dir` was not yet
    /// registered (the caller must then start watching it).
    fn insert(&self, dir: &Path, file: &Path) -> bool {
        let mut entry = self.by_dir.entry_sync(dir.to_path_buf()).or_default();
        let files = entry.get_mut();
        // An empty list means the entry was just created; registration
        // never leaves one behind.
        let new_dir = files.is_empty();
        if !files.iter().any(|known| known == file) {
            files.push(file.to_path_buf());
        }
        new_dir
    }

    fn contains_file(&self, dir: &Path, file: &Path) -> bool {
        self.by_dir
            .read_sync(dir, |_, files| files.iter().any(|known| known == file))
            .unwrap_or(false)
    }

    /// Snapshot of the full registry for introspection.
    fn snapshot(&self) -> HashMap<PathBuf, Vec<PathBuf>> {
        let mut out = HashMap::new();
        self.by_dir.iter_sync(|dir, files| {
            out.insert(dir.clone(), files.clone());
            true
        });
        out
    }
}

/// Expires store entries when their files change on disk.
///
/// Owns the platform watcher; dropping this drops every OS-level watch.
pub(crate) struct InvalidationWatcher {
    watcher: RecommendedWatcher,
    registry: Arc<WatchRegistry>,
}

impl InvalidationWatcher {
    /// Build a watcher whose event handler expires store entries for
    /// registered paths and then invokes `observer`.
    pub(crate) fn new(store: ContentStore, observer: Observer) -> Result<Self, notify::Error> {
        let registry = Arc::new(WatchRegistry::default());
        let handler_registry = Arc::clone(&registry);
        let watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::error!(error = %err, "filesystem watch error");
                        return;
                    }
                };
                let kind = match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) => ChangeKind::Changed,
                    EventKind::Remove(_) => ChangeKind::Removed,
                    _ => return,
                };
                for path in &event.paths {
                    let Some(dir) = path.parent() else { continue };
                    if !handler_registry.contains_file(dir, path) {
                        continue;
                    }
                    // Expire before notifying: the observer must never see
                    // the stale entry.
                    store.remove(path);
                    tracing::debug!(path = %path.display(), kind = %kind, "watched file changed, entry expired");
                    (*observer)(kind, path);
                }
            })?;
        Ok(Self { watcher, registry })
    }

    /// Register `path` for invalidation by watching its parent directory.
    ///
    /// Directories are watched non-recursively, once each; additional files
    /// under an already-watched directory only extend the registry.
    pub(crate) fn register(&mut self, path: &Path) -> Result<(), notify::Error> {
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        if self.registry.insert(dir, path) {
            self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }
        Ok(())
    }

    pub(crate) fn watched(&self) -> HashMap<PathBuf, Vec<PathBuf>> {
        self.registry.snapshot()
    }
}
