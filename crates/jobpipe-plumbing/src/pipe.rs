//! Unbuffered OS pipes
//!
//! Both ends are created close-on-exec (non-inheritable on Windows), so a
//! child only ever holds the end explicitly handed to it as stdio. That keeps
//! end-of-stream honest: the read side sees EOF as soon as every writer that
//! was deliberately shared has gone.

use std::fs::File;
use std::io::{self, Read, Write};
use std::process::Stdio;

#[cfg(unix)]
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle, OwnedHandle, RawHandle};

/// A one-way byte stream
#[derive(Debug)]
pub struct Pipe {
    /// Write side; bytes written here come out of `side_out`
    pub side_in: PipeWriter,
    /// Read side
    pub side_out: PipeReader,
}

impl Pipe {
    /// Allocate a new OS pipe
    pub fn new() -> io::Result<Self> {
        let (read, write) = os_pipe()?;
        Ok(Self {
            side_in: PipeWriter(write),
            side_out: PipeReader(read),
        })
    }

    /// Split into (write side, read side)
    pub fn into_parts(self) -> (PipeWriter, PipeReader) {
        (self.side_in, self.side_out)
    }
}

/// Read end of a [`Pipe`]
#[derive(Debug)]
pub struct PipeReader(File);

/// Write end of a [`Pipe`]
#[derive(Debug)]
pub struct PipeWriter(File);

impl PipeReader {
    /// Duplicate the underlying OS handle
    pub fn try_clone(&self) -> io::Result<Self> {
        self.0.try_clone().map(Self)
    }
}

impl PipeWriter {
    /// Duplicate the underlying OS handle
    pub fn try_clone(&self) -> io::Result<Self> {
        self.0.try_clone().map(Self)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Read for &PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.0).read(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl From<PipeReader> for Stdio {
    fn from(reader: PipeReader) -> Self {
        Stdio::from(reader.0)
    }
}

impl From<PipeWriter> for Stdio {
    fn from(writer: PipeWriter) -> Self {
        Stdio::from(writer.0)
    }
}

impl From<PipeReader> for File {
    fn from(reader: PipeReader) -> Self {
        reader.0
    }
}

impl From<PipeWriter> for File {
    fn from(writer: PipeWriter) -> Self {
        writer.0
    }
}

#[cfg(unix)]
mod unix_handles {
    use super::*;

    impl AsFd for PipeReader {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.0.as_fd()
        }
    }

    impl AsRawFd for PipeReader {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    impl AsFd for PipeWriter {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.0.as_fd()
        }
    }

    impl AsRawFd for PipeWriter {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    impl From<PipeReader> for OwnedFd {
        fn from(reader: PipeReader) -> Self {
            reader.0.into()
        }
    }

    impl From<PipeWriter> for OwnedFd {
        fn from(writer: PipeWriter) -> Self {
            writer.0.into()
        }
    }
}

#[cfg(windows)]
mod windows_handles {
    use super::*;

    impl AsHandle for PipeReader {
        fn as_handle(&self) -> BorrowedHandle<'_> {
            self.0.as_handle()
        }
    }

    impl AsRawHandle for PipeReader {
        fn as_raw_handle(&self) -> RawHandle {
            self.0.as_raw_handle()
        }
    }

    impl AsHandle for PipeWriter {
        fn as_handle(&self) -> BorrowedHandle<'_> {
            self.0.as_handle()
        }
    }

    impl AsRawHandle for PipeWriter {
        fn as_raw_handle(&self) -> RawHandle {
            self.0.as_raw_handle()
        }
    }

    impl From<PipeReader> for OwnedHandle {
        fn from(reader: PipeReader) -> Self {
            reader.0.into()
        }
    }

    impl From<PipeWriter> for OwnedHandle {
        fn from(writer: PipeWriter) -> Self {
            writer.0.into()
        }
    }
}

#[cfg(all(unix, not(any(target_os = "macos", target_os = "ios"))))]
fn os_pipe() -> io::Result<(File, File)> {
    use nix::fcntl::OFlag;

    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    Ok((File::from(read), File::from(write)))
}

// No pipe2 on Apple platforms; close-on-exec is set right after creation.
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn os_pipe() -> io::Result<(File, File)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (read, write) = nix::unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((File::from(read), File::from(write)))
}

#[cfg(windows)]
fn os_pipe() -> io::Result<(File, File)> {
    use std::os::windows::io::FromRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::System::Pipes::CreatePipe;

    let mut read: HANDLE = std::ptr::null_mut();
    let mut write: HANDLE = std::ptr::null_mut();
    // SAFETY: both out-pointers are valid; null security attributes yield
    // non-inheritable handles which we take sole ownership of below.
    let created = unsafe { CreatePipe(&mut read, &mut write, std::ptr::null(), 0) };
    if created == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: CreatePipe succeeded, so both handles are open and unowned.
    unsafe {
        Ok((
            File::from_raw_handle(read as RawHandle),
            File::from_raw_handle(write as RawHandle),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goes_through() {
        let pipe = Pipe::new().unwrap();
        let (mut side_in, mut side_out) = pipe.into_parts();
        side_in.write_all(b"Hello").unwrap();
        drop(side_in);

        let mut data = Vec::new();
        side_out.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn test_eof_is_idempotent() {
        let Pipe {
            mut side_in,
            mut side_out,
        } = Pipe::new().unwrap();
        side_in.write_all(b"spam").unwrap();

        let mut buf = [0u8; 64];
        let n = side_out.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"spam");

        drop(side_in);
        assert_eq!(side_out.read(&mut buf).unwrap(), 0);
        assert_eq!(side_out.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_clone_keeps_stream_open() {
        let Pipe {
            side_in,
            mut side_out,
        } = Pipe::new().unwrap();
        let mut second = side_in.try_clone().unwrap();
        drop(side_in);

        second.write_all(b"eggs").unwrap();
        drop(second);

        let mut data = Vec::new();
        side_out.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"eggs");
    }

    #[cfg(unix)]
    #[test]
    fn test_close_on_exec() {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};

        let pipe = Pipe::new().unwrap();
        for fd in [pipe.side_in.as_raw_fd(), pipe.side_out.as_raw_fd()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }
}
