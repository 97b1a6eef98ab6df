//! Turn an SNS delivery into the list of log objects to process.
//!
//! Two message shapes arrive inside the SNS envelope:
//! - CloudTrail's own delivery notice: `{"s3Bucket": "...", "s3ObjectKey": ["..."]}`
//! - an S3 event notification: `{"Records": [{"s3": {"bucket": {"name": ..}, "object": {"key": ..}}}]}`

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum PayloadType {
    Cloudtrail,
    S3,
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadType::Cloudtrail => f.write_str("cloudtrail"),
            PayloadType::S3 => f.write_str("s3"),
        }
    }
}

impl FromStr for PayloadType {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloudtrail" => Ok(PayloadType::Cloudtrail),
            "s3" => Ok(PayloadType::S3),
            other => Err(NotificationError::UnknownPayloadType(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), key: key.into() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("decode SNS envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("decode message {message_id}: {source}")]
    Message {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("decode object key {key:?}: {reason}")]
    Key { key: String, reason: String },
    #[error("unknown payload type {0:?}, expected cloudtrail or s3")]
    UnknownPayloadType(String),
}

#[derive(Deserialize)]
struct SnsEvent {
    #[serde(rename = "Records", default)]
    records: Vec<SnsRecord>,
}

#[derive(Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsEntity,
}

#[derive(Deserialize)]
struct SnsEntity {
    #[serde(rename = "MessageId", default)]
    message_id: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Deserialize)]
struct CloudtrailNotice {
    #[serde(rename = "s3Bucket", default)]
    s3_bucket: String,
    #[serde(rename = "s3ObjectKey", default)]
    s3_object_keys: Vec<String>,
}

#[derive(Deserialize)]
struct S3Event {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
}

#[derive(Deserialize)]
struct S3EventRecord {
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
}

/// Extract every (bucket, key) pair from an SNS payload, in delivery order.
pub fn extract_objects(payload: &[u8], kind: PayloadType) -> Result<Vec<ObjectRef>, NotificationError> {
    let event: SnsEvent = serde_json::from_slice(payload).map_err(NotificationError::Envelope)?;
    let mut out = Vec::new();

    for rec in event.records {
        let SnsEntity { message_id, message } = rec.sns;
        tracing::info!(id = %message_id, kind = %kind, "sns record");
        match kind {
            PayloadType::Cloudtrail => {
                let notice: CloudtrailNotice =
                    serde_json::from_str(&message).map_err(|source| NotificationError::Message { message_id, source })?;
                out.extend(notice.s3_object_keys.into_iter().map(|key| ObjectRef::new(notice.s3_bucket.clone(), key)));
            }
            PayloadType::S3 => {
                let s3: S3Event =
                    serde_json::from_str(&message).map_err(|source| NotificationError::Message { message_id, source })?;
                for r in s3.records {
                    out.push(ObjectRef::new(r.s3.bucket.name, decode_s3_key(&r.s3.object.key)?));
                }
            }
        }
    }
    Ok(out)
}

/// S3 event keys are form-encoded: `+` is a space, everything else is %-escaped.
pub fn decode_s3_key(raw: &str) -> Result<String, NotificationError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| NotificationError::Key { key: raw.to_string(), reason: e.to_string() })
}
