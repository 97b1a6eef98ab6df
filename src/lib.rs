mod codec;
mod config;
mod config_store;
mod encoder;
mod error;
mod filter;
mod handler;
mod notification;
mod processor;
mod rules;
mod store;
mod util;

pub use crate::config::ProcessorOptions;
pub use crate::error::{ProcessError, StreamingError};

// rules + filtering
pub use crate::rules::{is_recognized_field, FieldError, Match, Rule, RuleSet, ValidationErrors, RECOGNIZED_FIELDS};
pub use crate::filter::{filter_records, FilterStats};

// document codec
pub use crate::codec::{decode_document, decode_record, DecodeError, Document, FieldValue, InputEncoding, Record};

// streaming output
pub use crate::encoder::{EncodeError, EncodeHandle, EncodeStats, EncodedStream, StreamingEncoder, DEFAULT_COMPRESSION_LEVEL, DEFAULT_CONDUIT_BYTES};

// collaborators
pub use crate::store::{ByteStream, LocalObjectStore, MemoryObjectStore, ObjectStore, PutOptions, StoreError, StoredObject};
pub use crate::config_store::{CachedConfigStore, ConfigStore, FileConfigStore, MemoryConfigStore};
pub use crate::notification::{decode_s3_key, extract_objects, NotificationError, ObjectRef, PayloadType};

// orchestration
pub use crate::processor::{FileProcessor, ProcessSummary, Stage};
pub use crate::handler::Handler;

pub use crate::util::{init_tracing_once, LogFormat};

// callers need the token type to drive cancellation
pub use tokio_util::sync::CancellationToken;
