//! Chunked reads with end-of-stream detection

use std::io::{self, Read};

/// Default maximum chunk size for every forwarder
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Reads an endpoint one chunk at a time into a reusable buffer.
///
/// A zero-length read is end of stream. A read failing with `BrokenPipe` is
/// also end of stream: closing an endpoint out from under a reader is the
/// only way to stop a forwarder.
#[derive(Debug)]
pub struct ChunkReader {
    buf: Vec<u8>,
}

impl ChunkReader {
    /// Create a reader producing chunks of at most `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: vec![0; chunk_size.max(1)],
        }
    }

    /// Maximum chunk size
    pub fn chunk_size(&self) -> usize {
        self.buf.len()
    }

    /// Read the next chunk; `Ok(None)` at end of stream
    pub fn next_chunk<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<&[u8]>> {
        loop {
            match reader.read(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(&self.buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
