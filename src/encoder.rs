//! Streaming encoder: serialize + gzip a document on a background task while
//! the caller reads the compressed bytes from the other end of a bounded
//! in-memory pipe.
//!
//! The pipe is a `tokio::io::duplex` pair, so a full buffer parks the encoder
//! and an empty one parks the reader. If either end is dropped the other side
//! unblocks (`BrokenPipe` for the writer, EOF for the reader).
//!
//! A clean EOF is only reported to the reader once the encoder has signalled
//! success. If the encoder fails, the reader gets an error after the last
//! byte it did produce, so an uploader never commits a truncated object.

use crate::codec::Document;
use crate::error::StreamingError;
use async_compression::tokio::write::GzipEncoder;
use async_compression::Level;
use serde::Serialize;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const DEFAULT_CONDUIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

const DOC_OPEN: &[u8] = b"{\"Records\":[";
const DOC_CLOSE: &[u8] = b"]}\n";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("serialize record {index}: {source}")]
    Serialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("compress output: {0}")]
    Compress(#[source] io::Error),
    #[error("output stream closed by reader")]
    ConduitClosed,
}

impl EncodeError {
    fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::BrokenPipe { EncodeError::ConduitClosed } else { EncodeError::Compress(e) }
    }
}

/// What the encoder wrote before compression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub records: usize,
    pub uncompressed_bytes: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct StreamingEncoder {
    buffer_bytes: usize,
    level: u32,
}

impl Default for StreamingEncoder {
    fn default() -> Self {
        Self { buffer_bytes: DEFAULT_CONDUIT_BYTES, level: DEFAULT_COMPRESSION_LEVEL }
    }
}

impl StreamingEncoder {
    pub fn new(buffer_bytes: usize, level: u32) -> Self {
        Self { buffer_bytes: buffer_bytes.max(1), level: level.min(9) }
    }

    /// Start encoding `doc` on a spawned task. Must be called within a tokio runtime.
    pub fn spawn<R>(&self, doc: Document<R>) -> (EncodedStream, EncodeHandle)
    where
        R: Serialize + Send + 'static,
    {
        let (rd, wr) = tokio::io::duplex(self.buffer_bytes);
        let (done_tx, done_rx) = oneshot::channel();
        let level = Level::Precise(self.level as i32);

        let task = tokio::spawn(async move {
            let res = produce(wr, doc.records, level).await;
            let signal = match &res {
                Ok(_) => Ok(()),
                Err(e) => Err(e.to_string()),
            };
            let _ = done_tx.send(signal);
            match &res {
                Ok(stats) => tracing::debug!(records = stats.records, bytes = stats.uncompressed_bytes, "encoder finished"),
                Err(e) => tracing::warn!(error = %e, "encoder failed"),
            }
            res
        });

        (EncodedStream { inner: rd, done: done_rx, outcome: None }, EncodeHandle { task })
    }
}

async fn produce<R: Serialize>(wr: DuplexStream, records: Vec<R>, level: Level) -> Result<EncodeStats, EncodeError> {
    let mut gz = GzipEncoder::with_quality(wr, level);
    let mut scratch: Vec<u8> = Vec::with_capacity(16 * 1024);
    let mut stats = EncodeStats::default();

    gz.write_all(DOC_OPEN).await.map_err(EncodeError::from_io)?;
    stats.uncompressed_bytes += DOC_OPEN.len() as u64;

    for (index, rec) in records.into_iter().enumerate() {
        scratch.clear();
        if index > 0 {
            scratch.push(b',');
        }
        serde_json::to_writer(&mut scratch, &rec).map_err(|source| EncodeError::Serialize { index, source })?;
        gz.write_all(&scratch).await.map_err(EncodeError::from_io)?;
        stats.uncompressed_bytes += scratch.len() as u64;
        stats.records += 1;
    }

    gz.write_all(DOC_CLOSE).await.map_err(EncodeError::from_io)?;
    stats.uncompressed_bytes += DOC_CLOSE.len() as u64;

    // finishes the gzip trailer and closes the write end
    gz.shutdown().await.map_err(EncodeError::from_io)?;
    Ok(stats)
}

/// Join handle for the encoder task.
pub struct EncodeHandle {
    task: JoinHandle<Result<EncodeStats, EncodeError>>,
}

impl EncodeHandle {
    pub async fn join(self) -> Result<EncodeStats, StreamingError> {
        match self.task.await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(StreamingError::Producer(e)),
            Err(e) => Err(StreamingError::Join(e)),
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Read end of the encoder pipe.
pub struct EncodedStream {
    inner: DuplexStream,
    done: oneshot::Receiver<Result<(), String>>,
    outcome: Option<Result<(), String>>,
}

impl AsyncRead for EncodedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        if self.outcome.is_none() {
            let outcome = match ready!(Pin::new(&mut self.done).poll(cx)) {
                Ok(signal) => signal,
                Err(_) => Err("encoder stopped before finishing the stream".to_string()),
            };
            self.outcome = Some(outcome);
        }
        match &self.outcome {
            Some(Err(msg)) => Poll::Ready(Err(io::Error::other(format!("truncated output: {}", msg)))),
            _ => Poll::Ready(Ok(())),
        }
    }
}
