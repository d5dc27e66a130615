//! In-memory sink shared between a forwarder and its owner

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// Growable byte buffer that can be handed to a forwarder as its output
/// while the owner keeps a clone to inspect what arrived.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes; usable directly as a Tee observer
    pub fn append(&self, data: &[u8]) -> io::Result<()> {
        self.bytes.lock().extend_from_slice(data);
        Ok(())
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_contents() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"spam").unwrap();
        buffer.append(b"eggs").unwrap();

        assert_eq!(buffer.contents(), b"spameggs");
        assert_eq!(writer.len(), 8);
        assert!(!buffer.is_empty());
    }
}
