//! Read-deduplicating content store.
//!
//! Maps file paths to cached content. A slot is `Pending` while the first
//! read for its path is in flight, then promoted to `Materialized` once the
//! read completes. Readers that arrive while a slot is `Pending` attach to
//! the in-flight read via a [`Shared`] future instead of issuing a second
//! read, so at most one underlying read runs per path.
//!
//! Entries are unbounded and live for the process lifetime unless removed
//! explicitly; staleness is the caller's concern.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::channel::oneshot;
use futures::future::Shared;

use crate::error::SharedIoError;

/// The shared handle to an in-flight read. Every attached reader awaits a
/// clone of this future and receives the same content or failure.
pub(crate) type SharedRead =
    Shared<Pin<Box<dyn Future<Output = Result<Arc<str>, SharedIoError>> + Send>>>;

/// Two-state slot: `Pending` while the first read for the path is running,
/// `Materialized` once content is available.
pub(crate) enum Slot {
    Pending(SharedRead),
    Materialized(Arc<str>),
}

/// Outcome of [`ContentStore::begin_read`].
pub(crate) enum BeginRead {
    /// The path is materialized; no I/O needed.
    Hit(Arc<str>),
    /// Another read for the path is in flight; await it instead of reading.
    Join(SharedRead),
    /// This caller owns the read. A `Pending` slot has already been inserted
    /// so concurrent callers can attach; the caller must resolve the ticket.
    Miss(ReadTicket),
}

/// Path-keyed content store shared by every read and expire call.
///
/// Cheap to clone: clones share the same map, so read tickets and the
/// invalidation watcher can hold their own handle.
#[derive(Default, Clone)]
pub(crate) struct ContentStore {
    map: Arc<scc::HashMap<PathBuf, Slot>>,
}

impl ContentStore {
    /// Classify a read of `path` and, on a miss, claim it atomically.
    ///
    /// The check-and-insert uses the entry API so two concurrent first reads
    /// of the same uncached path cannot both claim it: exactly one receives
    /// [`BeginRead::Miss`], the other joins the pending slot.
    pub(crate) async fn begin_read(&self, path: &Path) -> BeginRead {
        // Fast path: slot already present.
        let existing = self
            .map
            .read_async(path, |_, slot| match slot {
                Slot::Materialized(content) => BeginRead::Hit(Arc::clone(content)),
                Slot::Pending(shared) => BeginRead::Join(shared.clone()),
            })
            .await;
        if let Some(found) = existing {
            return found;
        }

        match self.map.entry_async(path.to_path_buf()).await {
            scc::hash_map::Entry::Occupied(occ) => match occ.get() {
                Slot::Materialized(content) => BeginRead::Hit(Arc::clone(content)),
                Slot::Pending(shared) => BeginRead::Join(shared.clone()),
            },
            scc::hash_map::Entry::Vacant(vac) => {
                let (tx, rx) = oneshot::channel::<Result<Arc<str>, SharedIoError>>();
                // A dropped sender means the owning read never completed;
                // attached readers see an interrupted error, not a hang.
                let fut: Pin<Box<dyn Future<Output = Result<Arc<str>, SharedIoError>> + Send>> =
                    Box::pin(async move {
                        rx.await
                            .unwrap_or_else(|_| Err(SharedIoError::interrupted()))
                    });
                let shared = fut.shared();
                vac.insert_entry(Slot::Pending(shared.clone()));
                BeginRead::Miss(ReadTicket {
                    store: self.clone(),
                    path: path.to_path_buf(),
                    tx: Some(tx),
                    shared,
                })
            }
        }
    }

    /// Remove the entry for `path`, returning whether one was present.
    ///
    /// Removing a `Pending` slot does not cancel the in-flight read; readers
    /// already attached still receive its outcome, but the result is not
    /// materialized and the next read is a miss.
    pub(crate) fn remove(&self, path: &Path) -> bool {
        self.map.remove_sync(path).is_some()
    }

    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.map.read_sync(path, |_, _| ()).is_some()
    }

    /// Every path currently present, in no particular order.
    pub(crate) fn cached_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(self.map.len());
        self.map.iter_sync(|path, _| {
            paths.push(path.clone());
            true
        });
        paths
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Promote `path` to `Materialized`, but only if its slot still holds
    /// this exact in-flight read. An intervening expire (or a replacement
    /// read) wins over a late promotion.
    fn materialize(&self, path: &Path, shared: &SharedRead, content: Arc<str>) {
        self.map.update_sync(path, |_, slot| {
            if matches!(slot, Slot::Pending(current) if current.ptr_eq(shared)) {
                *slot = Slot::Materialized(content);
            }
        });
    }

    /// Drop the `Pending` slot for `path` if it still holds this exact
    /// in-flight read. Failed reads must never stay cached, so a retry hits
    /// the filesystem again.
    fn evict_pending(&self, path: &Path, shared: &SharedRead) {
        drop(
            self.map.remove_if_sync(path, |slot| {
                matches!(slot, Slot::Pending(current) if current.ptr_eq(shared))
            }),
        );
    }
}

/// Claim on an in-flight read, handed out by [`ContentStore::begin_read`].
///
/// The owner resolves it exactly once via [`complete`](Self::complete):
/// success materializes the slot, failure evicts it, and either outcome is
/// fanned out to attached readers. Dropping an unresolved ticket (the owning
/// read was cancelled mid-flight) evicts the slot and fails attached readers
/// with an interrupted error.
pub(crate) struct ReadTicket {
    store: ContentStore,
    path: PathBuf,
    tx: Option<oneshot::Sender<Result<Arc<str>, SharedIoError>>>,
    shared: SharedRead,
}

impl ReadTicket {
    /// Resolve the in-flight read. Store state is settled before attached
    /// readers are woken, so a reader observing a failure and retrying is
    /// guaranteed a fresh miss.
    pub(crate) fn complete(mut self, result: Result<Arc<str>, SharedIoError>) {
        match &result {
            Ok(content) => {
                self.store
                    .materialize(&self.path, &self.shared, Arc::clone(content));
            }
            Err(_) => self.store.evict_pending(&self.path, &self.shared),
        }
        if let Some(tx) = self.tx.take() {
            drop(tx.send(result));
        }
    }
}

impl Drop for ReadTicket {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.store.evict_pending(&self.path, &self.shared);
            // Dropping the sender wakes attached readers with an
            // interrupted error via the receiver fallback.
            drop(tx);
        }
    }
}
