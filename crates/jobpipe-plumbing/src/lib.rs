//! # jobpipe-plumbing
//!
//! **Purpose**: Move bytes between already-open local streams
//!
//! Every forwarder runs on its own background thread and reads its input in
//! fixed-size chunks, so chunk boundaries seen downstream are the boundaries
//! the OS handed back.
//!
//! ## Features
//!
//! - **Pipe**: unbuffered OS pipe whose ends plug straight into `std::process::Stdio`
//! - **Tee**: forward while handing every chunk to an observer, with an end-of-stream callback
//! - **Valve**: forward with a cross-thread on/off gate
//! - **QuickConnect**: forward while input and output may be swapped live
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobpipe_plumbing::{Pipe, SharedBuffer, Tee};
//! use std::io::Write;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream = Pipe::new()?;
//! let seen = SharedBuffer::new();
//! let captured = SharedBuffer::new();
//!
//! let observer = seen.clone();
//! let tee = Tee::builder(upstream.side_out, captured.clone())
//!     .observer(move |chunk| observer.append(chunk))
//!     .spawn()?;
//!
//! let mut writer = upstream.side_in;
//! writer.write_all(b"hello")?;
//! drop(writer);
//!
//! tee.join()?;
//! assert_eq!(seen.contents(), captured.contents());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod pipe;
pub mod quickconnect;
pub mod selector;
pub mod tee;
pub mod valve;

pub use buffer::SharedBuffer;
pub use chunk::{ChunkReader, DEFAULT_CHUNK_SIZE};
pub use config::ForwardOptions;
pub use error::{PlumbingError, Result};
pub use forwarder::{BoxWriter, Outcome, StreamEnd};
pub use pipe::{Pipe, PipeReader, PipeWriter};
pub use quickconnect::QuickConnect;
pub use selector::Source;
pub use tee::{Tee, TeeBuilder};
pub use valve::Valve;
