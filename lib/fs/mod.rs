//! Filesystem collaborators and the cached read/concat/copy surface.

/// The cached filesystem facade.
pub mod file_cache;
/// Cached read streams.
pub mod stream;

use std::future::Future;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::io::{AsyncReadExt as _, AsyncWrite};

/// Raw filesystem access consumed by the cache.
///
/// The cache never touches the filesystem directly; it reads, streams, and
/// writes through an implementation of this trait. Production code uses
/// [`TokioFs`]; tests substitute scripted collaborators to control content,
/// failures, and timing.
pub trait FsAccess: Clone + Send + Sync + 'static {
    /// Chunked byte stream produced by [`open_read_stream`](Self::open_read_stream).
    type ReadStream: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static;
    /// Writable sink produced by [`open_write_stream`](Self::open_write_stream).
    type WriteSink: AsyncWrite + Send + Unpin + 'static;

    /// Read the whole file at `path` as UTF-8 text.
    fn read_to_string(
        &self,
        path: &Path,
    ) -> impl Future<Output = std::io::Result<String>> + Send;

    /// Open a chunked read stream over the file at `path`.
    fn open_read_stream(
        &self,
        path: &Path,
    ) -> impl Future<Output = std::io::Result<Self::ReadStream>> + Send;

    /// Open a writable sink at `path`, truncating any existing file.
    fn open_write_stream(
        &self,
        path: &Path,
    ) -> impl Future<Output = std::io::Result<Self::WriteSink>> + Send;

    /// Create `path` and any missing intermediate directories. Idempotent.
    fn ensure_dir(&self, path: &Path) -> impl Future<Output = std::io::Result<()>> + Send;
}

/// Chunk size for [`TokioFs`] read streams.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// The production [`FsAccess`] implementation, backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

impl FsAccess for TokioFs {
    type ReadStream = BoxStream<'static, std::io::Result<Bytes>>;
    type WriteSink = tokio::fs::File;

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn open_read_stream(&self, path: &Path) -> std::io::Result<Self::ReadStream> {
        let file = tokio::fs::File::open(path).await?;
        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let n = file.read_buf(&mut buf).await?;
            if n == 0 {
                Ok(None)
            } else {
                Ok(Some((buf.freeze(), file)))
            }
        });
        Ok(stream.boxed())
    }

    async fn open_write_stream(&self, path: &Path) -> std::io::Result<Self::WriteSink> {
        tokio::fs::File::create(path).await
    }

    async fn ensure_dir(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }
}
