//! Valve: forward with an on/off gate
//!
//! The forwarding thread waits for input readiness first, then checks the
//! gate and reads with the gate lock released, so switching the valve never
//! waits on I/O. Once [`Valve::turn_off`] returns no new read is committed; a
//! read already committed (at most `chunk_size` bytes) is still written.
//! While off, the thread sleeps on a condition variable rather than polling.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::chunk::ChunkReader;
use crate::config::ForwardOptions;
use crate::error::Result;
use crate::forwarder::{self, BoxWriter, Outcome, StreamEnd, Worker};
use crate::selector::{self, Source};

/// Binary gate shared between the valve handle and its thread
#[derive(Debug, Default)]
struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn set(&self, open: bool) {
        *self.open.lock() = open;
        self.changed.notify_all();
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }

    fn wait_open(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
    }
}

/// Forwards input to output while its gate is open. Starts closed.
pub struct Valve {
    gate: Arc<Gate>,
    worker: Worker,
}

impl Valve {
    /// Start a closed valve with default options
    pub fn new<S, W>(input: S, output: W) -> Result<Self>
    where
        S: Source + 'static,
        W: Write + Send + 'static,
    {
        Self::with_options(input, output, ForwardOptions::new())
    }

    /// Start a closed valve
    pub fn with_options<S, W>(input: S, output: W, options: ForwardOptions) -> Result<Self>
    where
        S: Source + 'static,
        W: Write + Send + 'static,
    {
        options.validate()?;
        let gate = Arc::new(Gate::default());
        let name = options.name_or("valve");

        let thread_gate = Arc::clone(&gate);
        let worker = Worker::spawn(name.clone(), move || {
            let mut input = input;
            let mut output: BoxWriter = Box::new(output);
            let end = pump(&name, &mut input, &mut output, &thread_gate, &options);
            forwarder::finish(&name, output, end, None, options.keep_output_open)
        })?;

        Ok(Self { gate, worker })
    }

    /// Enable flow
    pub fn turn_on(&self) {
        debug!(forwarder = %self.worker.name(), "Valve on");
        self.gate.set(true);
    }

    /// Disable flow; no read is committed after this returns
    pub fn turn_off(&self) {
        debug!(forwarder = %self.worker.name(), "Valve off");
        self.gate.set(false);
    }

    /// Whether flow is enabled
    pub fn is_on(&self) -> bool {
        self.gate.is_open()
    }

    /// Whether forwarding has ended
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for end of stream. The valve must be on for that to happen.
    pub fn join(self) -> Result<Outcome> {
        self.worker.join()
    }
}

impl fmt::Debug for Valve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Valve")
            .field("on", &self.is_on())
            .field("worker", &self.worker)
            .finish()
    }
}

fn pump<S: Source>(
    name: &str,
    input: &mut S,
    output: &mut BoxWriter,
    gate: &Gate,
    options: &ForwardOptions,
) -> StreamEnd {
    let mut chunks = ChunkReader::new(options.chunk_size);
    loop {
        gate.wait_open();
        if let Err(e) = selector::wait_readable(&*input, None, options.poll_interval) {
            return StreamEnd::Failed(e);
        }

        if !gate.is_open() {
            continue;
        }

        match chunks.next_chunk(input) {
            Ok(Some(chunk)) => {
                trace!(forwarder = %name, bytes = chunk.len(), "Forwarding chunk");
                if let Err(e) = output.write_all(chunk) {
                    return StreamEnd::Failed(e);
                }
            }
            Ok(None) => return StreamEnd::Eof,
            Err(e) => return StreamEnd::Failed(e),
        }
    }
}
