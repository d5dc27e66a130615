//! Forwarder configuration

use std::time::Duration;

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::error::{PlumbingError, Result};

/// Readiness polling interval on platforms without a pipe selector
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Options shared by every forwarder
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    /// Maximum bytes per read
    pub chunk_size: usize,
    /// Leave the output open (and hand it back from `join`) at end of stream
    pub keep_output_open: bool,
    /// Readiness polling interval where the OS cannot wait on a pipe
    pub poll_interval: Duration,
    /// Name for the background thread (None = forwarder kind)
    pub thread_name: Option<String>,
}

impl ForwardOptions {
    /// Create options with defaults (4096-byte chunks, output closed at EOF)
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            keep_output_open: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            thread_name: None,
        }
    }

    /// Set the chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Keep the output open after end of stream
    pub fn keep_output_open(mut self, keep: bool) -> Self {
        self.keep_output_open = keep;
        self
    }

    /// Set the readiness polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Name the background thread
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PlumbingError::InvalidConfig(
                "chunk_size must be non-zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PlumbingError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn name_or(&self, kind: &str) -> String {
        self.thread_name.clone().unwrap_or_else(|| kind.to_string())
    }
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self::new()
    }
}
