//! Error types for stream plumbing

use std::io;
use thiserror::Error;

/// Plumbing errors
///
/// Read and write failures inside a running forwarder are not reported here;
/// they end the forwarder and surface as [`crate::StreamEnd::Failed`].
#[derive(Debug, Error)]
pub enum PlumbingError {
    /// Invalid forwarder configuration
    #[error("Invalid forwarder configuration: {0}")]
    InvalidConfig(String),

    /// Failed to start the background forwarding thread
    #[error("Failed to spawn forwarder thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The forwarding thread panicked
    #[error("Forwarder `{name}` panicked")]
    Panicked { name: String },

    /// Endpoint setup failed
    #[error("Endpoint I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for plumbing operations
pub type Result<T> = std::result::Result<T, PlumbingError>;
