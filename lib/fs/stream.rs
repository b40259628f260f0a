//! Cached read streams.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::FutureExt as _;
use futures::Stream;
use futures::StreamExt as _;

use crate::cache::store::{ReadTicket, SharedRead};
use crate::error::SharedIoError;
use crate::fs::FsAccess;

/// A single-consumer read stream over one file's content, produced by
/// [`FileCache::read_stream`](crate::fs::file_cache::FileCache::read_stream).
///
/// Yields `Bytes` chunks in original order. Depending on the cache state at
/// creation time the chunks come from the store (hit), from an in-flight
/// read started by another caller (attach), or from the filesystem
/// collaborator (miss) — in the miss case the data is accumulated on the
/// side and materialized into the store when the stream ends cleanly.
pub struct ContentStream<F: FsAccess> {
    state: State<F::ReadStream>,
}

impl<F: FsAccess> std::fmt::Debug for ContentStream<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream").finish_non_exhaustive()
    }
}

enum State<S> {
    /// Replays a materialized entry: yields the content once, then ends.
    Replay(Option<Arc<str>>),
    /// Attached to an in-flight read; yields its content once it completes.
    Join(SharedRead),
    /// First read of the path: passes the collaborator's chunks through
    /// untouched while accumulating a copy for the store.
    Tap(TapStream<S>),
    Done,
}

struct TapStream<S> {
    inner: S,
    buf: BytesMut,
    ticket: Option<ReadTicket>,
}

impl<F: FsAccess> ContentStream<F> {
    pub(crate) fn replay(content: Arc<str>) -> Self {
        Self {
            state: State::Replay(Some(content)),
        }
    }

    pub(crate) fn join(shared: SharedRead) -> Self {
        Self {
            state: State::Join(shared),
        }
    }

    pub(crate) fn tap(inner: F::ReadStream, ticket: ReadTicket) -> Self {
        Self {
            state: State::Tap(TapStream {
                inner,
                buf: BytesMut::new(),
                ticket: Some(ticket),
            }),
        }
    }
}

impl<F: FsAccess> Stream for ContentStream<F> {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::Replay(content) => {
                    let content = content.take();
                    this.state = State::Done;
                    return Poll::Ready(match content {
                        Some(content) if !content.is_empty() => {
                            Some(Ok(Bytes::copy_from_slice(content.as_bytes())))
                        }
                        _ => None,
                    });
                }
                State::Join(shared) => match shared.poll_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(content)) => {
                        this.state = State::Replay(Some(content));
                    }
                    Poll::Ready(Err(err)) => {
                        this.state = State::Done;
                        return Poll::Ready(Some(Err(err.into())));
                    }
                },
                State::Tap(tap) => match tap.inner.poll_next_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(Ok(chunk))) => {
                        tap.buf.extend_from_slice(&chunk);
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Some(Err(err))) => {
                        // Attached readers get a clone-able error with the
                        // kind preserved; this consumer gets the original.
                        if let Some(ticket) = tap.ticket.take() {
                            ticket.complete(Err(SharedIoError::new(std::io::Error::new(
                                err.kind(),
                                err.to_string(),
                            ))));
                        }
                        this.state = State::Done;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        let buf = std::mem::take(&mut tap.buf);
                        if let Some(ticket) = tap.ticket.take() {
                            match String::from_utf8(buf.to_vec()) {
                                Ok(content) => ticket.complete(Ok(Arc::from(content))),
                                Err(err) => ticket.complete(Err(SharedIoError::new(
                                    std::io::Error::new(std::io::ErrorKind::InvalidData, err),
                                ))),
                            }
                        }
                        this.state = State::Done;
                        return Poll::Ready(None);
                    }
                },
                State::Done => return Poll::Ready(None),
            }
        }
    }
}
