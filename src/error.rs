use crate::codec::DecodeError;
use crate::encoder::EncodeError;
use crate::notification::NotificationError;
use crate::rules::ValidationErrors;
use crate::store::StoreError;
use thiserror::Error;

/// Failure of the encode + upload stage.
#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("encoder failed: {0}")]
    Producer(#[source] EncodeError),
    #[error("upload failed: {0}")]
    Consumer(#[source] StoreError),
    #[error("encoder task did not complete: {0}")]
    Join(#[source] tokio::task::JoinError),
}

/// Why processing a file (or an invocation) failed.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("rules validation failed: {0}")]
    ConfigInvalid(ValidationErrors),

    #[error("load rules configuration failed: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to decode source file: {0}")]
    Decode(#[from] DecodeError),

    #[error("evaluate record {index}: {source}")]
    Eval {
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Streaming(#[from] StreamingError),

    /// Collaborator failures (retrieval, config lookup), passed through as-is.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("invocation cancelled")]
    Cancelled,
}

impl ProcessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::Store(StoreError::NotFound(_)))
    }
}
