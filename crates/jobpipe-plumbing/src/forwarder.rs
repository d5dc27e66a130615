//! Machinery shared by every forwarder: the background thread, end-of-stream
//! reporting, and the output close policy.

use std::fmt;
use std::io::{self, Write};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{PlumbingError, Result};

/// Boxed output endpoint
pub type BoxWriter = Box<dyn Write + Send>;

/// Callback run once when a forwarder reaches the end of its input
pub type EofCallback = Box<dyn FnOnce(&StreamEnd) + Send>;

/// How a forwarding loop ended
#[derive(Debug)]
pub enum StreamEnd {
    /// The input reached end of stream
    Eof,
    /// A read, write, or observer failure stopped forwarding
    Failed(io::Error),
}

impl StreamEnd {
    /// Whether the input ended cleanly
    pub fn is_eof(&self) -> bool {
        matches!(self, StreamEnd::Eof)
    }

    /// The failure that stopped forwarding, if any
    pub fn error(&self) -> Option<&io::Error> {
        match self {
            StreamEnd::Eof => None,
            StreamEnd::Failed(e) => Some(e),
        }
    }
}

/// Result of a finished forwarder
pub struct Outcome {
    /// How forwarding ended
    pub end: StreamEnd,
    /// The output endpoint, present only when it was kept open
    pub output: Option<BoxWriter>,
}

impl Outcome {
    /// Turn a failed stream end into an error, keeping the output otherwise
    pub fn into_result(self) -> io::Result<Option<BoxWriter>> {
        match self.end {
            StreamEnd::Eof => Ok(self.output),
            StreamEnd::Failed(e) => Err(e),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("end", &self.end)
            .field("output_kept", &self.output.is_some())
            .finish()
    }
}

/// A running forwarding thread
pub(crate) struct Worker {
    name: String,
    handle: JoinHandle<Outcome>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self>
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(PlumbingError::ThreadSpawn)?;
        debug!(forwarder = %name, "Forwarder started");
        Ok(Self { name, handle })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) fn join(self) -> Result<Outcome> {
        let Self { name, handle } = self;
        handle.join().map_err(|_| {
            warn!(forwarder = %name, "Forwarder thread panicked");
            PlumbingError::Panicked { name }
        })
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// End-of-stream sequence: flush, report, then close unless kept open.
///
/// A flush failure after a clean EOF replaces the EOF so the callback and
/// the outcome both see it.
pub(crate) fn finish(
    name: &str,
    mut output: BoxWriter,
    mut end: StreamEnd,
    on_eof: Option<EofCallback>,
    keep_output_open: bool,
) -> Outcome {
    if let Err(e) = output.flush() {
        if end.is_eof() {
            end = StreamEnd::Failed(e);
        }
    }

    match &end {
        StreamEnd::Eof => debug!(forwarder = %name, "Input reached end of stream"),
        StreamEnd::Failed(e) => warn!(forwarder = %name, error = %e, "Forwarding stopped"),
    }

    if let Some(callback) = on_eof {
        callback(&end);
    }

    let output = if keep_output_open {
        Some(output)
    } else {
        drop(output);
        None
    };
    Outcome { end, output }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingFlush;

    impl Write for FailingFlush {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[test]
    fn test_finish_closes_by_default() {
        let outcome = finish(
            "test",
            Box::new(SharedBuffer::new()),
            StreamEnd::Eof,
            None,
            false,
        );
        assert!(outcome.end.is_eof());
        assert!(outcome.output.is_none());
    }

    #[test]
    fn test_finish_keeps_output_when_asked() {
        let outcome = finish("test", Box::new(SharedBuffer::new()), StreamEnd::Eof, None, true);
        assert!(outcome.into_result().unwrap().is_some());
    }

    #[test]
    fn test_callback_runs_once_with_flush_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let outcome = finish(
            "test",
            Box::new(FailingFlush),
            StreamEnd::Eof,
            Some(Box::new(move |end: &StreamEnd| {
                assert!(end.error().is_some());
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            false,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn test_worker_reports_panic() {
        let worker = Worker::spawn("doomed".to_string(), || panic!("boom")).unwrap();
        match worker.join() {
            Err(PlumbingError::Panicked { name }) => assert_eq!(name, "doomed"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
