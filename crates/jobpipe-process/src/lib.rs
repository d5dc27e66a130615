//! # jobpipe-process
//!
//! **Purpose**: Child processes and process groups with POSIX-style job control
//!
//! Gives every platform the same lifecycle: start, signal, pause/resume,
//! terminate, kill and join, for single processes and for groups whose
//! members (and their descendants) are controlled as one unit.
//!
//! ## Features
//!
//! - **Process**: INIT → RUNNING ⇄ PAUSED → FINISHED, observed by a reaper thread
//! - **ProcessGroup**: leader election and `killpg` on POSIX, Job Objects on Windows
//! - **Blocking and async joins**: any number of joiners, tokio-friendly `wait`
//! - **Native return codes**: exit code, or the negated signal number on POSIX
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobpipe_process::{Process, ProcessConfig, ProcessGroup};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let group = ProcessGroup::new()?;
//! group.add(Arc::new(Process::new(ProcessConfig::new("sleep").arg("30"))))?;
//! group.add(Arc::new(Process::new(ProcessConfig::new("sleep").arg("30"))))?;
//!
//! group.start()?;
//! group.pause()?;
//! group.unpause()?;
//!
//! // Reaches every member and anything they spawned
//! group.kill()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod group;
mod platform;
pub mod process;

pub use config::ProcessConfig;
pub use error::{ProcessError, Result};
pub use group::ProcessGroup;
pub use platform::signals;
pub use process::{Process, ProcessStatus};
