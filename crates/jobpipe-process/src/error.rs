//! Error types for process management

use std::io;
use thiserror::Error;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// `start` called on something already started
    #[error("Already started")]
    AlreadyStarted,

    /// Process already belongs to a group
    #[error("Process already belongs to a process group")]
    AlreadyGrouped,

    /// Operation not available in the current state or on this platform
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The platform group handle could not be created
    #[error("Failed to create process group: {0}")]
    GroupCreationFailed(#[source] io::Error),

    /// A platform call failed; carries the native error code
    #[error("{call} failed: {source}")]
    PlatformCall {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// Process timed out
    #[error("Process timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Invalid configuration
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// The blocking wait behind an async wait did not complete
    #[error("Wait task failed: {0}")]
    Join(String),
}

impl ProcessError {
    /// Wrap the calling thread's last OS error
    pub(crate) fn last_os_error(call: &'static str) -> Self {
        Self::PlatformCall {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// Native error code of a failed platform call
    pub fn os_error_code(&self) -> Option<i32> {
        match self {
            Self::PlatformCall { source, .. }
            | Self::SpawnFailed { source, .. }
            | Self::GroupCreationFailed(source) => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_error_code() {
        let err = ProcessError::PlatformCall {
            call: "kill",
            source: io::Error::from_raw_os_error(3),
        };
        assert_eq!(err.os_error_code(), Some(3));
        assert_eq!(ProcessError::AlreadyGrouped.os_error_code(), None);
        assert!(err.to_string().starts_with("kill failed"));
    }
}
