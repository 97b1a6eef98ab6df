//! Invocation entry: one notification payload in, one summary per file out.

use crate::error::ProcessError;
use crate::notification::{extract_objects, PayloadType};
use crate::processor::{FileProcessor, ProcessSummary};
use tokio_util::sync::CancellationToken;

pub struct Handler {
    processor: FileProcessor,
    payload_type: PayloadType,
}

impl Handler {
    pub fn new(processor: FileProcessor, payload_type: PayloadType) -> Self {
        Self { processor, payload_type }
    }

    pub fn processor(&self) -> &FileProcessor { &self.processor }

    /// Process every object named in `payload`, in order. Stops at the first failure.
    pub async fn handle(&self, payload: &[u8], cancel: &CancellationToken) -> Result<Vec<ProcessSummary>, ProcessError> {
        let objects = extract_objects(payload, self.payload_type).inspect_err(|e| {
            tracing::error!(error = %e, "failed to decode notification");
        })?;
        tracing::info!(objects = objects.len(), "process event");

        let mut summaries = Vec::with_capacity(objects.len());
        for obj in &objects {
            let summary = self.processor.process_object(obj, cancel).await.inspect_err(|e| {
                tracing::error!(object = %obj, error = %e, "failed to process file");
            })?;
            summaries.push(summary);
        }
        Ok(summaries)
    }
}
