//! Tee: forward while observing every chunk
//!
//! The observer and eof callback run on the forwarder's own thread. A blocked
//! observer blocks forwarding and a failing observer ends it, so anything slow
//! belongs on a queue the observer hands chunks to.

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use tracing::trace;

use crate::chunk::ChunkReader;
use crate::config::ForwardOptions;
use crate::error::Result;
use crate::forwarder::{self, BoxWriter, EofCallback, Outcome, StreamEnd, Worker};

type Observer = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// Forwards input to output, handing each chunk to an observer first
pub struct Tee {
    worker: Worker,
}

impl Tee {
    /// Start a tee with an observer and default options
    pub fn new<R, W, F>(input: R, output: W, observer: F) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        F: FnMut(&[u8]) -> io::Result<()> + Send + 'static,
    {
        Self::builder(input, output).observer(observer).spawn()
    }

    /// Configure a tee before starting it
    pub fn builder<R, W>(input: R, output: W) -> TeeBuilder
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        TeeBuilder {
            input: Box::new(input),
            output: Box::new(output),
            observer: None,
            on_eof: None,
            options: ForwardOptions::new(),
        }
    }

    /// Whether forwarding has ended
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for end of stream
    pub fn join(self) -> Result<Outcome> {
        self.worker.join()
    }
}

impl fmt::Debug for Tee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tee").field("worker", &self.worker).finish()
    }
}

/// Builder for [`Tee`]
pub struct TeeBuilder {
    input: Box<dyn Read + Send>,
    output: BoxWriter,
    observer: Option<Observer>,
    on_eof: Option<EofCallback>,
    options: ForwardOptions,
}

impl TeeBuilder {
    /// Called with every chunk before it is written onward
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&[u8]) -> io::Result<()> + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Called exactly once after the last chunk was written, before the
    /// output is closed
    pub fn on_eof<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&StreamEnd) + Send + 'static,
    {
        self.on_eof = Some(Box::new(callback));
        self
    }

    /// Keep the output open at end of stream
    pub fn keep_output_open(mut self, keep: bool) -> Self {
        self.options.keep_output_open = keep;
        self
    }

    /// Replace all options
    pub fn options(mut self, options: ForwardOptions) -> Self {
        self.options = options;
        self
    }

    /// Start forwarding on a background thread
    pub fn spawn(self) -> Result<Tee> {
        self.options.validate()?;
        let name = self.options.name_or("tee");
        let thread_name = name.clone();
        let worker = Worker::spawn(thread_name, move || {
            let TeeBuilder {
                mut input,
                mut output,
                observer,
                on_eof,
                options,
            } = self;
            let mut observer: Observer = match observer {
                Some(observer) => observer,
                None => Box::new(|_: &[u8]| Ok(())),
            };
            let end = pump(&name, &mut *input, &mut output, &mut observer, options.chunk_size);
            forwarder::finish(&name, output, end, on_eof, options.keep_output_open)
        })?;
        Ok(Tee { worker })
    }
}

fn pump(
    name: &str,
    input: &mut dyn Read,
    output: &mut BoxWriter,
    observer: &mut Observer,
    chunk_size: usize,
) -> StreamEnd {
    let mut chunks = ChunkReader::new(chunk_size);
    loop {
        let chunk = match chunks.next_chunk(input) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return StreamEnd::Eof,
            Err(e) => return StreamEnd::Failed(e),
        };
        trace!(forwarder = %name, bytes = chunk.len(), "Forwarding chunk");
        let observed = panic::catch_unwind(AssertUnwindSafe(|| observer(chunk)))
            .unwrap_or_else(|payload| Err(observer_panic(payload.as_ref())));
        if let Err(e) = observed {
            return StreamEnd::Failed(e);
        }
        if let Err(e) = output.write_all(chunk) {
            return StreamEnd::Failed(e);
        }
    }
}

/// A panicking observer ends the stream like a failing one
fn observer_panic(payload: &(dyn Any + Send)) -> io::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    io::Error::other(format!("observer panicked: {message}"))
}
