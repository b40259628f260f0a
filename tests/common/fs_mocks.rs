#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

use fs_cache::FsAccess;

/// Chunk size for mock read streams, small enough that even short fixture
/// contents span several chunks.
const MOCK_CHUNK_SIZE: usize = 4;

/// Shared state backing [`MockFs`].
#[derive(Default)]
pub struct MockFsState {
    /// path -> content served by buffered reads and streams.
    pub contents: Mutex<HashMap<PathBuf, String>>,
    /// Paths whose buffered reads and stream opens fail with `NotFound`.
    pub fail_reads: Mutex<HashSet<PathBuf>>,
    /// Paths whose streams yield one chunk and then a `BrokenPipe` error.
    pub fail_streams_midflight: Mutex<HashSet<PathBuf>>,
    /// Paths whose write sinks fail on the first write.
    pub fail_writes: Mutex<HashSet<PathBuf>>,
    /// Artificial delay before each buffered read resolves.
    pub read_delay: Mutex<Option<Duration>>,
    /// Buffered-read calls that reached the collaborator.
    pub read_calls: AtomicUsize,
    /// Stream opens that reached the collaborator.
    pub stream_calls: AtomicUsize,
    /// Directories passed to `ensure_dir`, in call order.
    pub ensured_dirs: Mutex<Vec<PathBuf>>,
}

/// A scripted [`FsAccess`] collaborator with controllable contents, failures,
/// timing, and call counting.
#[derive(Clone, Default)]
pub struct MockFs {
    pub state: Arc<MockFsState>,
}

impl MockFs {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let fs = Self::default();
        {
            let mut contents = fs.state.contents.lock().unwrap();
            for (path, content) in files {
                contents.insert(PathBuf::from(path), (*content).to_owned());
            }
        }
        fs
    }

    pub fn put(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.state
            .contents
            .lock()
            .unwrap()
            .insert(path.into(), content.into());
    }

    pub fn content(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.contents.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn fail_reads_of(&self, path: impl Into<PathBuf>) {
        self.state.fail_reads.lock().unwrap().insert(path.into());
    }

    pub fn heal_reads_of(&self, path: impl AsRef<Path>) {
        self.state.fail_reads.lock().unwrap().remove(path.as_ref());
    }

    pub fn fail_stream_midflight(&self, path: impl Into<PathBuf>) {
        self.state
            .fail_streams_midflight
            .lock()
            .unwrap()
            .insert(path.into());
    }

    pub fn heal_stream(&self, path: impl AsRef<Path>) {
        self.state
            .fail_streams_midflight
            .lock()
            .unwrap()
            .remove(path.as_ref());
    }

    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        self.state.fail_writes.lock().unwrap().insert(path.into());
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.state.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn read_calls(&self) -> usize {
        self.state.read_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.state.stream_calls.load(Ordering::SeqCst)
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("mock: no such file {}", path.display()),
        )
    }
}

impl FsAccess for MockFs {
    type ReadStream = BoxStream<'static, io::Result<Bytes>>;
    type WriteSink = MockSink;

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.state.read_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_reads.lock().unwrap().contains(path) {
            return Err(Self::not_found(path));
        }
        self.state
            .contents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    async fn open_read_stream(&self, path: &Path) -> io::Result<Self::ReadStream> {
        self.state.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_reads.lock().unwrap().contains(path) {
            return Err(Self::not_found(path));
        }
        let content = self
            .state
            .contents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))?;

        let mut items: Vec<io::Result<Bytes>> = content
            .as_bytes()
            .chunks(MOCK_CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if self
            .state
            .fail_streams_midflight
            .lock()
            .unwrap()
            .contains(path)
        {
            items.truncate(1);
            items.push(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock: stream failed mid-flight",
            )));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn open_write_stream(&self, path: &Path) -> io::Result<Self::WriteSink> {
        Ok(MockSink {
            path: path.to_path_buf(),
            buf: Vec::new(),
            state: Arc::clone(&self.state),
        })
    }

    async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        self.state
            .ensured_dirs
            .lock()
            .unwrap()
            .push(path.to_path_buf());
        Ok(())
    }
}

/// Write sink that commits its buffer into the mock's contents on shutdown.
pub struct MockSink {
    path: PathBuf,
    buf: Vec<u8>,
    state: Arc<MockFsState>,
}

impl AsyncWrite for MockSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.state.fail_writes.lock().unwrap().contains(&this.path) {
            return Poll::Ready(Err(io::Error::other("mock: write failed")));
        }
        this.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let committed = String::from_utf8_lossy(&this.buf).into_owned();
        this.state
            .contents
            .lock()
            .unwrap()
            .insert(this.path.clone(), committed);
        Poll::Ready(Ok(()))
    }
}
