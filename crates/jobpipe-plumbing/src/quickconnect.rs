//! QuickConnect: forward while either endpoint may be swapped
//!
//! Input and output live behind separate locks. Swapping the input raises a
//! wake signal; the forwarding thread, woken by it instead of by readiness,
//! clears it and waits again on whatever input is current, so it never reads
//! a descriptor that was just replaced.
//!
//! The gap between replacing the input and raising the signal is not atomic
//! with respect to writers on the old stream. Callers needing a clean hand-off
//! serialize their swaps and observe EOF upstream with a [`crate::Tee`].

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::chunk::ChunkReader;
use crate::config::ForwardOptions;
use crate::error::Result;
use crate::forwarder::{self, BoxWriter, Outcome, StreamEnd, Worker};
use crate::selector::{self, Readiness, Source, WakeSignal};

type SharedInput = Arc<Mutex<Box<dyn Source>>>;

struct Connection {
    input: Mutex<SharedInput>,
    output: Mutex<BoxWriter>,
    changed: WakeSignal,
}

/// Forwards input to output; both ends can be replaced while live.
/// The output stays open at end of stream unless configured otherwise.
pub struct QuickConnect {
    connection: Arc<Connection>,
    worker: Worker,
}

impl QuickConnect {
    /// Start forwarding with the output kept open at EOF
    pub fn new<S, W>(input: S, output: W) -> Result<Self>
    where
        S: Source + 'static,
        W: Write + Send + 'static,
    {
        Self::with_options(input, output, ForwardOptions::new().keep_output_open(true))
    }

    /// Start forwarding
    pub fn with_options<S, W>(input: S, output: W, options: ForwardOptions) -> Result<Self>
    where
        S: Source + 'static,
        W: Write + Send + 'static,
    {
        options.validate()?;
        let input: Box<dyn Source> = Box::new(input);
        let connection = Arc::new(Connection {
            input: Mutex::new(Arc::new(Mutex::new(input))),
            output: Mutex::new(Box::new(output)),
            changed: WakeSignal::new()?,
        });
        let name = options.name_or("quickconnect");

        let thread_connection = Arc::clone(&connection);
        let worker = Worker::spawn(name.clone(), move || {
            let end = pump(&name, &thread_connection, &options);
            let output = std::mem::replace(
                &mut *thread_connection.output.lock(),
                Box::new(std::io::sink()),
            );
            forwarder::finish(&name, output, end, None, options.keep_output_open)
        })?;

        Ok(Self { connection, worker })
    }

    /// Replace the input. The previous input is released once the
    /// forwarding thread lets go of it.
    pub fn set_input<S: Source + 'static>(&self, input: S) {
        let input: Box<dyn Source> = Box::new(input);
        *self.connection.input.lock() = Arc::new(Mutex::new(input));
        self.connection.changed.raise();
        debug!(forwarder = %self.worker.name(), "Input swapped");
    }

    /// Replace the output, returning the previous one. Takes effect from the
    /// next chunk written.
    pub fn set_output<W: Write + Send + 'static>(&self, output: W) -> BoxWriter {
        let previous = std::mem::replace(&mut *self.connection.output.lock(), Box::new(output));
        debug!(forwarder = %self.worker.name(), "Output swapped");
        previous
    }

    /// Whether forwarding has ended
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for end of stream on the current input
    pub fn join(self) -> Result<Outcome> {
        self.worker.join()
    }
}

impl fmt::Debug for QuickConnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickConnect")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

fn pump(name: &str, connection: &Connection, options: &ForwardOptions) -> StreamEnd {
    let mut chunks = ChunkReader::new(options.chunk_size);
    loop {
        let current = Arc::clone(&*connection.input.lock());
        let mut input = current.lock();

        match selector::wait_readable(&**input, Some(&connection.changed), options.poll_interval) {
            Ok(Readiness::Woken) => {
                connection.changed.clear();
                continue;
            }
            Ok(Readiness::Readable) => {}
            Err(e) => return StreamEnd::Failed(e),
        }

        match chunks.next_chunk(&mut **input) {
            Ok(Some(chunk)) => {
                trace!(forwarder = %name, bytes = chunk.len(), "Forwarding chunk");
                if let Err(e) = connection.output.lock().write_all(chunk) {
                    return StreamEnd::Failed(e);
                }
            }
            Ok(None) => return StreamEnd::Eof,
            Err(e) => return StreamEnd::Failed(e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::pipe::Pipe;
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(buffer: &SharedBuffer, expected: &[u8]) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.contents() != expected {
            assert!(Instant::now() < deadline, "timed out waiting for {expected:?}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_through() {
        let upstream = Pipe::new().unwrap();
        let downstream = Pipe::new().unwrap();
        let qc = QuickConnect::with_options(
            upstream.side_out,
            downstream.side_in,
            ForwardOptions::new().keep_output_open(false),
        )
        .unwrap();

        let mut writer = upstream.side_in;
        writer.write_all(b"spameggs").unwrap();
        drop(writer);

        let mut roundtrip = Vec::new();
        let mut reader = downstream.side_out;
        reader.read_to_end(&mut roundtrip).unwrap();
        assert_eq!(roundtrip, b"spameggs");
        assert!(qc.join().unwrap().output.is_none());
    }

    #[test]
    fn test_output_kept_open_by_default() {
        let upstream = Pipe::new().unwrap();
        let captured = SharedBuffer::new();
        let qc = QuickConnect::new(upstream.side_out, captured.clone()).unwrap();

        drop(upstream.side_in);
        let outcome = qc.join().unwrap();
        assert!(outcome.end.is_eof());
        assert!(outcome.output.is_some());
    }

    #[test]
    fn test_swap_input_while_idle() {
        let first = Pipe::new().unwrap();
        let second = Pipe::new().unwrap();
        let captured = SharedBuffer::new();
        let qc = QuickConnect::new(first.side_out, captured.clone()).unwrap();

        let mut first_writer = first.side_in;
        first_writer.write_all(b"one").unwrap();
        wait_for(&captured, b"one");

        qc.set_input(second.side_out);
        // Bytes on the old stream are no longer forwarded; the write fails
        // outright once the forwarder has released the old reader.
        let _ = first_writer.write_all(b"lost");

        let mut second_writer = second.side_in;
        second_writer.write_all(b"two").unwrap();
        wait_for(&captured, b"onetwo");

        drop(second_writer);
        assert!(qc.join().unwrap().end.is_eof());
        assert_eq!(captured.contents(), b"onetwo");
    }

    #[test]
    fn test_swap_output() {
        let upstream = Pipe::new().unwrap();
        let before = SharedBuffer::new();
        let after = SharedBuffer::new();
        let qc = QuickConnect::new(upstream.side_out, before.clone()).unwrap();

        let mut writer = upstream.side_in;
        writer.write_all(b"spam").unwrap();
        wait_for(&before, b"spam");

        let _previous = qc.set_output(after.clone());
        writer.write_all(b"eggs").unwrap();
        wait_for(&after, b"eggs");

        drop(writer);
        qc.join().unwrap();
        assert_eq!(before.contents(), b"spam");
    }
}
