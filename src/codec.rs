//! CloudTrail document decoding: compression sniffing, the `Records` envelope,
//! and a lazily-classified field view over a single raw record.

use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::io::{self, BufReader, Read};
use thiserror::Error;
use zstd::stream::read::Decoder as ZstdDecoder;

const READ_BUF_BYTES: usize = 256 * 1024;

/// A CloudTrail log file: `{"Records": [...]}`.
///
/// Records stay in their original encoded form (`Box<RawValue>`), so the
/// bytes written back out are exactly the bytes that were read.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub struct Document<R = Box<RawValue>> {
    /// Absent and `null` both decode as no records.
    #[serde(rename = "Records", default, deserialize_with = "null_as_empty")]
    pub records: Vec<R>,
}

fn null_as_empty<'de, D, R>(d: D) -> Result<Vec<R>, D::Error>
where
    D: Deserializer<'de>,
    R: Deserialize<'de>,
{
    Ok(Option::<Vec<R>>::deserialize(d)?.unwrap_or_default())
}

impl<R> Default for Document<R> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<R> Document<R> {
    pub fn new(records: Vec<R>) -> Self { Self { records } }
    pub fn len(&self) -> usize { self.records.len() }
    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decompress input: {0}")]
    Decompress(#[source] io::Error),
    #[error("decode document: {0}")]
    Document(#[source] serde_json::Error),
    #[error("decode record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Input compression, detected from magic bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEncoding {
    Gzip,
    Zstd,
    Plain,
}

impl InputEncoding {
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes {
            [0x1f, 0x8b, ..] => InputEncoding::Gzip,
            [0x28, 0xb5, 0x2f, 0xfd, ..] => InputEncoding::Zstd,
            _ => InputEncoding::Plain,
        }
    }
}

/// Decode a whole (optionally gzip/zstd compressed) log file.
pub fn decode_document(bytes: &[u8]) -> Result<Document, DecodeError> {
    match InputEncoding::sniff(bytes) {
        InputEncoding::Gzip => from_reader(MultiGzDecoder::new(bytes)),
        InputEncoding::Zstd => {
            let mut dec = ZstdDecoder::new(bytes).map_err(DecodeError::Decompress)?;
            dec.window_log_max(31).map_err(DecodeError::Decompress)?;
            from_reader(dec)
        }
        InputEncoding::Plain => serde_json::from_slice(bytes).map_err(DecodeError::Document),
    }
}

fn from_reader<R: Read>(r: R) -> Result<Document, DecodeError> {
    let rdr = BufReader::with_capacity(READ_BUF_BYTES, r);
    serde_json::from_reader(rdr).map_err(|e| {
        if e.is_io() { DecodeError::Decompress(io::Error::from(e)) } else { DecodeError::Document(e) }
    })
}

/// One decoded record: top-level keys in document order, values left raw.
#[derive(Debug)]
pub struct Record<'a> {
    fields: IndexMap<String, &'a RawValue>,
}

impl<'a> Record<'a> {
    pub fn fields(&self) -> impl Iterator<Item = (&str, &'a RawValue)> + '_ {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn get(&self, name: &str) -> Option<FieldValue<'a>> {
        self.fields.get(name).copied().map(FieldValue::of)
    }

    pub fn len(&self) -> usize { self.fields.len() }
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

/// Decode a raw record into its field view. Fails if the record is not a JSON object.
pub fn decode_record(raw: &RawValue) -> Result<Record<'_>, serde_json::Error> {
    let fields = serde_json::from_str(raw.get())?;
    Ok(Record { fields })
}

/// The scalar shape of a field value. Numbers keep their source text.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<'a> {
    String(Cow<'a, str>),
    Number(&'a str),
    Bool(bool),
    Null,
    Other,
}

impl<'a> FieldValue<'a> {
    pub fn of(raw: &'a RawValue) -> Self {
        let text = raw.get().trim();
        match text.as_bytes().first() {
            Some(b'"') => {
                let inner = &text[1..text.len().saturating_sub(1).max(1)];
                if inner.contains('\\') {
                    match serde_json::from_str::<String>(text) {
                        Ok(s) => FieldValue::String(Cow::Owned(s)),
                        Err(_) => FieldValue::Other,
                    }
                } else {
                    FieldValue::String(Cow::Borrowed(inner))
                }
            }
            Some(b't') => FieldValue::Bool(true),
            Some(b'f') => FieldValue::Bool(false),
            Some(b'n') => FieldValue::Null,
            Some(b'-' | b'0'..=b'9') => FieldValue::Number(text),
            _ => FieldValue::Other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}
