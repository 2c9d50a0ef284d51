//! Lazy byte-range fetching behind a sequential-read interface.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use crate::{ReadError, ReadResult};

/// Default minimum byte-range size per fetch. Large enough to amortize
/// per-request overhead; override through `ReadOptions::fetch_chunk_size`.
pub const DEFAULT_FETCH_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Random-access byte source backing a [`RangeReader`].
///
/// A fetch may return fewer bytes than requested only at end of object; an
/// empty result means `offset` is at or past the end.
#[async_trait]
pub trait RangeFetch: Send + 'static {
    async fn fetch(&mut self, offset: u64, len: u64) -> ReadResult<Bytes>;
}

/// Sequential reader over lazily fetched byte ranges.
///
/// One window is live at a time: a refill issues exactly one range request of
/// `chunk_size` bytes at the next unread offset. Sequential reads never
/// re-fetch buffered bytes, and a bounded read only touches the windows its
/// consumer actually pulls.
pub struct RangeReader {
    inner: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
}

impl RangeReader {
    pub fn new<F: RangeFetch>(fetch: F, chunk_size: usize) -> RangeReader {
        let chunk = chunk_size.max(1) as u64;
        let windows = futures::stream::try_unfold(
            (fetch, 0u64, false),
            move |(mut fetch, offset, done)| async move {
                if done {
                    return Ok(None);
                }
                let window = fetch
                    .fetch(offset, chunk)
                    .await
                    .map_err(ReadError::into_io)?;
                if window.is_empty() {
                    return Ok(None);
                }
                let next = offset + window.len() as u64;
                // A short window marks the end of the object.
                let done = (window.len() as u64) < chunk;
                Ok(Some((window, (fetch, next, done))))
            },
        );
        RangeReader {
            inner: StreamReader::new(windows.boxed()),
        }
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
