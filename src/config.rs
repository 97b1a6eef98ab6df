use crate::encoder::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_CONDUIT_BYTES};

const MIN_CONDUIT_BYTES: usize = 8 * 1024;

/// Per-deployment processor options with builder chaining.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub output_bucket: String,       // destination bucket; the key is kept from the source
    pub rules_path: String,          // config store path of the rules YAML
    pub conduit_buffer_bytes: usize, // in-flight bytes between encoder and uploader
    pub compression_level: u32,      // gzip level 0..=9
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            output_bucket: String::new(),
            rules_path: "/cloudtrail/rules".to_string(),
            conduit_buffer_bytes: DEFAULT_CONDUIT_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl ProcessorOptions {
    pub fn new(output_bucket: impl Into<String>) -> Self {
        Self::default().with_output_bucket(output_bucket)
    }
    pub fn with_output_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.output_bucket = bucket.into().trim().to_string();
        self
    }
    pub fn with_rules_path(mut self, path: impl Into<String>) -> Self {
        self.rules_path = path.into();
        self
    }
    pub fn with_conduit_buffer(mut self, bytes: usize) -> Self {
        self.conduit_buffer_bytes = bytes.max(MIN_CONDUIT_BYTES);
        self
    }
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }
}
