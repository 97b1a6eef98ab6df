//! Per-file pipeline: retrieve -> decode -> load rules -> filter ->
//! encode + upload (concurrently) -> summary.
//!
//! Any stage error ends the run for that file; nothing after it executes.

use crate::codec::{decode_document, Document};
use crate::config::ProcessorOptions;
use crate::config_store::ConfigStore;
use crate::encoder::{EncodeError, EncodeStats, StreamingEncoder};
use crate::error::{ProcessError, StreamingError};
use crate::filter::filter_records;
use crate::notification::ObjectRef;
use crate::rules::RuleSet;
use crate::store::{ObjectStore, PutOptions, StoreError};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Pipeline stage, reported with failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Retrieve,
    Decode,
    LoadRules,
    Filter,
    EncodeUpload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Retrieve => "retrieve",
            Stage::Decode => "decode",
            Stage::LoadRules => "load_rules",
            Stage::Filter => "filter",
            Stage::EncodeUpload => "encode_upload",
        };
        f.write_str(s)
    }
}

/// Outcome of one processed file.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessSummary {
    pub source_bucket: String,
    pub key: String,
    pub destination: String,
    pub input_records: usize,
    pub output_records: usize,
    pub compressed_bytes: u64,
    pub upload_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

pub struct FileProcessor {
    store: Arc<dyn ObjectStore>,
    config: Arc<dyn ConfigStore>,
    opts: ProcessorOptions,
}

impl FileProcessor {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<dyn ConfigStore>, opts: ProcessorOptions) -> Self {
        Self { store, config, opts }
    }

    pub fn options(&self) -> &ProcessorOptions { &self.opts }

    pub async fn process_object(&self, obj: &ObjectRef, cancel: &CancellationToken) -> Result<ProcessSummary, ProcessError> {
        self.process(&obj.bucket, &obj.key, cancel).await
    }

    /// Filter `bucket/key` into the output bucket under the same key.
    #[tracing::instrument(name = "process_file", skip_all, fields(bucket = %bucket, key = %key))]
    pub async fn process(&self, bucket: &str, key: &str, cancel: &CancellationToken) -> Result<ProcessSummary, ProcessError> {
        let raw = cancellable(cancel, self.retrieve(bucket, key)).await.map_err(|e| failed(Stage::Retrieve, e))?;
        debug!(bytes = raw.len(), "retrieved source file");

        let input = decode_document(&raw).map_err(|e| failed(Stage::Decode, e.into()))?;
        drop(raw);
        info!(input = input.len(), "decoded source file");

        let rules = cancellable(cancel, self.load_rules()).await.map_err(|e| failed(Stage::LoadRules, e))?;

        let (output, stats) = filter_records(input, &rules).map_err(|e| failed(Stage::Filter, e))?;
        info!(input = stats.input, output = stats.output, dropped = stats.dropped(), "filtered records");

        let (upload_id, encoded, compressed_bytes) =
            self.encode_and_upload(key, output, cancel).await.map_err(|e| failed(Stage::EncodeUpload, e))?;
        debug!(records = encoded.records, uncompressed = encoded.uncompressed_bytes, "encoded output");

        let destination = format!("s3://{}/{}", self.opts.output_bucket, key);
        info!(
            path = %destination,
            input = stats.input,
            output = stats.output,
            req = %upload_id,
            "uploaded file"
        );

        Ok(ProcessSummary {
            source_bucket: bucket.to_string(),
            key: key.to_string(),
            destination,
            input_records: stats.input,
            output_records: stats.output,
            compressed_bytes,
            upload_id,
            finished_at: OffsetDateTime::now_utc(),
        })
    }

    async fn retrieve(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut body = self.store.get(bucket, key).await?;
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Fetch, parse and validate the rules. Validation failures are fatal.
    pub async fn load_rules(&self) -> Result<RuleSet, ProcessError> {
        let path = &self.opts.rules_path;
        info!(path = %path, "loading rules config");
        let text = self.config.get(path).await?;
        let rules = RuleSet::load(&text)?;
        let errs = rules.validate();
        if !errs.is_empty() {
            return Err(ProcessError::ConfigInvalid(errs));
        }
        debug!(rules = rules.len(), "rules validated");
        Ok(rules)
    }

    async fn encode_and_upload<R>(
        &self,
        key: &str,
        output: Document<R>,
        cancel: &CancellationToken,
    ) -> Result<(String, EncodeStats, u64), ProcessError>
    where
        R: Serialize + Send + 'static,
    {
        let encoder = StreamingEncoder::new(self.opts.conduit_buffer_bytes, self.opts.compression_level);
        let (stream, producer) = encoder.spawn(output);
        let counter = Arc::new(AtomicU64::new(0));
        let body = CountingReader { inner: stream, counter: counter.clone() };

        let upload = self.store.put_streaming(&self.opts.output_bucket, key, Box::new(body), PutOptions::gzip_json());
        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = upload => Some(r),
        };
        // The upload future (and with it the read end) is gone here, so a
        // producer parked on a full pipe has already been released.
        let Some(uploaded) = uploaded else {
            producer.abort();
            let _ = producer.join().await;
            return Err(ProcessError::Cancelled);
        };
        let produced = producer.join().await;

        match settle(produced, uploaded) {
            Ok((id, stats)) => Ok((id, stats, counter.load(Ordering::Relaxed))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Both sides must succeed. When both fail the encoder's error wins, unless it
/// only failed because the uploader stopped reading.
fn settle(
    produced: Result<EncodeStats, StreamingError>,
    uploaded: Result<String, StoreError>,
) -> Result<(String, EncodeStats), StreamingError> {
    match (produced, uploaded) {
        (Ok(stats), Ok(id)) => Ok((id, stats)),
        (Err(StreamingError::Producer(EncodeError::ConduitClosed)), Err(up)) => Err(StreamingError::Consumer(up)),
        (Err(p), _) => Err(p),
        (Ok(_), Err(up)) => Err(StreamingError::Consumer(up)),
    }
}

async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, ProcessError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ProcessError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        r = fut => r.map_err(Into::into),
    }
}

fn failed(stage: Stage, e: ProcessError) -> ProcessError {
    error!(stage = %stage, error = %e, "processing failed");
    e
}

/// A reader wrapper that counts the bytes handed to the uploader.
struct CountingReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Poll::Ready(Ok(()))
    }
}
