//! Request bodies and the streaming adapter.
//!
//! # Streaming without buffering
//!
//! Blob uploads can be hundreds of megabytes, so a body that comes from a
//! file must reach the socket chunk by chunk. [`ReaderBody`] adapts any
//! [`AsyncRead`] source into an [`http_body::Body`]: every poll reads at most
//! one chunk, and nothing is read until the transport asks for the next
//! frame. Back-pressure therefore comes for free from the transport.
//!
//! The opposite direction, response body to file, goes through [`pipe`],
//! which writes every chunk before pulling the next one and closes the sink
//! whether the source completes or fails.
//!
//! ## Body kinds
//!
//! - **Empty**: no payload (default for bodiless verbs)
//! - **Full**: a complete in-memory payload; can be replayed for retries
//! - **Stream**: a one-shot streaming payload; cannot be replayed

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::HttpError;

/// Upper bound of bytes read from a source per frame.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Body of an outgoing request.
#[derive(Default)]
pub enum RequestBody {
    /// No payload.
    #[default]
    Empty,
    /// Complete in-memory payload.
    Full(Bytes),
    /// Streaming payload forwarded to the transport as it is read.
    Stream(reqwest::Body),
}

impl RequestBody {
    /// Streams `reader` until it reports end of file.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        RequestBody::Stream(reqwest::Body::wrap(ReaderBody::new(reader)))
    }

    /// Streams exactly `length` bytes of `reader`.
    ///
    /// The length is advertised to the transport, so the request carries a
    /// `Content-Length` header. A source that ends early fails the request.
    pub fn from_reader_with_length<R>(reader: R, length: u64) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        RequestBody::Stream(reqwest::Body::wrap(ReaderBody::with_length(reader, length)))
    }

    /// Streams the chunks produced by `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures::TryStream + Send + 'static,
        S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        Bytes: From<S::Ok>,
    {
        RequestBody::Stream(reqwest::Body::wrap_stream(stream))
    }

    /// Returns a copy of the payload if this body can be sent again.
    pub fn snapshot(&self) -> Option<Bytes> {
        match self {
            RequestBody::Empty => Some(Bytes::new()),
            RequestBody::Full(bytes) => Some(bytes.clone()),
            RequestBody::Stream(_) => None,
        }
    }

    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Stream(_))
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Body {
        match self {
            RequestBody::Empty => reqwest::Body::from(Bytes::new()),
            RequestBody::Full(bytes) => reqwest::Body::from(bytes),
            RequestBody::Stream(body) => body,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.debug_tuple("Empty").finish(),
            RequestBody::Full(bytes) => f
                .debug_tuple("Full")
                .field(&format!("{} bytes", bytes.len()))
                .finish(),
            RequestBody::Stream(_) => f.debug_tuple("Stream").field(&"...").finish(),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Full(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Full(Bytes::from(text))
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Full(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Full(Bytes::from(bytes))
    }
}

/// [`HttpBody`] over an [`AsyncRead`] source.
///
/// Reads at most [`DEFAULT_CHUNK_SIZE`] bytes per frame. With a known length
/// the body never reads past it and reports an exact size hint.
#[pin_project]
pub struct ReaderBody<R> {
    #[pin]
    reader: R,
    remaining: Option<u64>,
    buffer: BytesMut,
    chunk_size: usize,
    finished: bool,
}

impl<R> ReaderBody<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            remaining: None,
            buffer: BytesMut::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            finished: false,
        }
    }

    pub fn with_length(reader: R, length: u64) -> Self {
        Self {
            remaining: Some(length),
            ..Self::new(reader)
        }
    }

    /// Overrides the per-frame read size.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl<R: AsyncRead> HttpBody for ReaderBody<R> {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        if *this.finished || *this.remaining == Some(0) {
            *this.finished = true;
            return Poll::Ready(None);
        }

        let want = match *this.remaining {
            Some(remaining) => remaining.min(*this.chunk_size as u64) as usize,
            None => *this.chunk_size,
        };
        this.buffer.reserve(want);

        let read = {
            let mut limited = (&mut *this.buffer).limit(want);
            match tokio_util::io::poll_read_buf(this.reader, cx, &mut limited) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Ok(read)) => read,
            }
        };

        if read == 0 {
            *this.finished = true;
            return match *this.remaining {
                Some(missing) => Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body source ended {missing} bytes early"),
                )))),
                None => Poll::Ready(None),
            };
        }

        if let Some(remaining) = this.remaining.as_mut() {
            *remaining -= read as u64;
        }
        Poll::Ready(Some(Ok(Frame::data(this.buffer.split().freeze()))))
    }

    fn size_hint(&self) -> SizeHint {
        match self.remaining {
            Some(remaining) => SizeHint::with_exact(remaining),
            None => SizeHint::default(),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished || self.remaining == Some(0)
    }
}

/// Copies every chunk of `source` into `sink`.
///
/// Each chunk is fully written before the next is pulled, so a slow sink
/// slows the source down instead of piling up memory. The sink is shut down
/// on both success and failure; the first error wins.
pub async fn pipe<S, E, W>(source: S, sink: &mut W) -> Result<u64, HttpError>
where
    S: Stream<Item = Result<Bytes, E>>,
    HttpError: From<E>,
    W: AsyncWrite + Unpin,
{
    let mut source = std::pin::pin!(source);
    let mut written = 0u64;

    let copied = async {
        while let Some(chunk) = source.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok::<(), HttpError>(())
    }
    .await;
    let closed = sink.shutdown().await;

    copied?;
    closed?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io::Cursor;

    #[tokio::test]
    async fn reader_body_yields_all_bytes_in_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut body = ReaderBody::new(Cursor::new(data.clone())).chunk_size(300);

        let mut frames = Vec::new();
        while let Some(frame) = body.frame().await {
            frames.push(frame.unwrap().into_data().unwrap());
        }

        assert_eq!(
            frames.iter().map(Bytes::len).collect::<Vec<_>>(),
            vec![300, 300, 300, 100]
        );
        assert_eq!(frames.concat(), data);
    }

    #[tokio::test]
    async fn reader_body_stops_at_length() {
        let body = ReaderBody::with_length(Cursor::new(b"0123456789".to_vec()), 4);
        assert_eq!(body.size_hint().exact(), Some(4));

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.as_ref(), b"0123");
    }

    #[tokio::test]
    async fn reader_body_fails_on_short_source() {
        let body = ReaderBody::with_length(Cursor::new(b"abc".to_vec()), 10);
        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn pipe_writes_every_chunk() {
        let chunks = vec![
            Ok::<_, io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let mut sink = Vec::new();
        let written = pipe(futures::stream::iter(chunks), &mut sink).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(sink, b"hello world");
    }

    #[tokio::test]
    async fn pipe_surfaces_source_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ];
        let mut sink = Vec::new();
        let err = pipe(futures::stream::iter(chunks), &mut sink).await.unwrap_err();
        assert!(matches!(err, HttpError::Io(_)));
        assert_eq!(sink, b"partial");
    }

    #[test]
    fn only_streams_are_not_replayable() {
        assert_eq!(RequestBody::from("abc").snapshot().unwrap().as_ref(), b"abc");
        assert!(RequestBody::Empty.is_replayable());
        assert!(!RequestBody::from_reader(Cursor::new(Vec::<u8>::new())).is_replayable());
    }
}
