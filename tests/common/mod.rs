#![allow(dead_code)]

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::value::RawValue;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use trailsieve::{
    ByteStream, CancellationToken, ConfigStore, FileProcessor, MemoryConfigStore, MemoryObjectStore, ObjectStore,
    ProcessorOptions, PutOptions, StoreError,
};

pub const SOURCE_BUCKET: &str = "trail-source";
pub const OUTPUT_BUCKET: &str = "trail-filtered";
pub const RULES_PATH: &str = "/cloudtrail/rules";

/// Drops KMS encrypt/decrypt chatter and anything from `ap-south-1`.
pub const RULES_YAML: &str = r#"
rules:
  - name: check_kms
    matches:
    - field_name: eventName
      regex: ".*crypt"
    - field_name: eventSource
      regex: "kms.*"
  - name: mumbai
    matches:
    - field_name: awsRegion
      regex: "^ap-south-1$"
"#;

/// A CloudTrail record with the four recognised fields plus the usual noise.
pub fn event(name: &str, source: &str, region: &str, account: &str) -> Value {
    json!({
        "eventVersion": "1.08",
        "userIdentity": {"type": "AssumedRole", "accountId": account, "arn": format!("arn:aws:sts::{account}:assumed-role/app")},
        "eventTime": "2024-03-01T12:00:00Z",
        "eventSource": source,
        "eventName": name,
        "awsRegion": region,
        "sourceIPAddress": "10.0.0.1",
        "requestParameters": {"keyId": "k-1", "encryptionContext": {"a": 1}},
        "responseElements": null,
        "readOnly": true,
        "eventID": uuid::Uuid::new_v4().to_string(),
        "recipientAccountId": account,
    })
}

/// Five records, two of which the rules in [`RULES_YAML`] drop.
pub fn scenario_records() -> Vec<Value> {
    vec![
        event("Decrypt", "kms.amazonaws.com", "us-east-1", "111111111111"),
        event("GetObject", "s3.amazonaws.com", "us-east-1", "111111111111"),
        event("PutLogEvents", "logs.amazonaws.com", "ap-south-1", "222222222222"),
        event("Encrypt", "logs.amazonaws.com", "eu-west-1", "222222222222"),
        event("AssumeRole", "sts.amazonaws.com", "eu-west-1", "333333333333"),
    ]
}

pub fn document(records: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&json!({ "Records": records })).unwrap()
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

pub fn zstd(bytes: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(bytes, 3).unwrap()
}

pub fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

#[derive(serde::Deserialize)]
struct RawDocument {
    #[serde(rename = "Records")]
    records: Vec<Box<RawValue>>,
}

/// Records of a gzipped output object, as their exact JSON text.
pub fn output_raw(bytes: &[u8]) -> Vec<String> {
    let doc: RawDocument = serde_json::from_slice(&gunzip(bytes)).unwrap();
    doc.records.into_iter().map(|r| r.get().to_string()).collect()
}

pub fn output_values(bytes: &[u8]) -> Vec<Value> {
    output_raw(bytes).iter().map(|s| serde_json::from_str(s).unwrap()).collect()
}

pub fn names(records: &[Value]) -> Vec<String> {
    records.iter().map(|r| r["eventName"].as_str().unwrap_or_default().to_string()).collect()
}

/// Memory-backed processor with the source object and rules already in place.
pub fn memory_processor(
    source: &[u8],
    rules: &str,
) -> (FileProcessor, Arc<MemoryObjectStore>, Arc<MemoryConfigStore>) {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(SOURCE_BUCKET, "AWSLogs/1/file.json.gz", source.to_vec());
    let config = Arc::new(MemoryConfigStore::new().with(RULES_PATH, rules));
    let processor = FileProcessor::new(store.clone(), config.clone(), ProcessorOptions::new(OUTPUT_BUCKET));
    (processor, store, config)
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

/// Serves reads from an inner store but fails every upload after pulling a few bytes.
pub struct FailingUploads {
    pub inner: Arc<MemoryObjectStore>,
}

#[async_trait]
impl ObjectStore for FailingUploads {
    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        self.inner.get(bucket, key).await
    }

    async fn put_streaming(&self, _bucket: &str, _key: &str, mut body: ByteStream, _opts: PutOptions) -> Result<String, StoreError> {
        let mut head = [0u8; 16];
        let _ = body.read(&mut head).await?;
        Err(StoreError::Other("upload rejected: quota exceeded".into()))
    }
}

/// Never answers; used to exercise cancellation.
pub struct StalledConfig;

#[async_trait]
impl ConfigStore for StalledConfig {
    async fn get(&self, _path: &str) -> Result<String, StoreError> {
        std::future::pending().await
    }
}

/// Accepts the upload call but never finishes reading the body.
pub struct StalledUploads {
    pub inner: Arc<MemoryObjectStore>,
}

#[async_trait]
impl ObjectStore for StalledUploads {
    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        self.inner.get(bucket, key).await
    }

    async fn put_streaming(&self, _bucket: &str, _key: &str, _body: ByteStream, _opts: PutOptions) -> Result<String, StoreError> {
        std::future::pending().await
    }
}
