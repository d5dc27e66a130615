//! Readiness waits on input endpoints
//!
//! POSIX waits in `poll(2)` on the input descriptor plus the read side of a
//! self-pipe used as the wake signal. Windows has no selector for anonymous
//! pipes, so readiness is polled with `PeekNamedPipe` at a bounded interval.

use std::io::{self, Read};
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::AsFd;
#[cfg(windows)]
use std::os::windows::io::AsHandle;

/// An input endpoint whose OS descriptor can be waited on for readiness.
///
/// Valve and QuickConnect need this; Tee accepts any `Read`.
#[cfg(unix)]
pub trait Source: Read + AsFd + Send {}

#[cfg(unix)]
impl<T: Read + AsFd + Send> Source for T {}

/// An input endpoint whose OS handle can be polled for readiness.
///
/// Valve and QuickConnect need this; Tee accepts any `Read`.
#[cfg(windows)]
pub trait Source: Read + AsHandle + Send {}

#[cfg(windows)]
impl<T: Read + AsHandle + Send> Source for T {}

/// Why a readiness wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// A read will not block (data, EOF, or an error to report)
    Readable,
    /// The wake signal was raised
    Woken,
}

#[cfg(unix)]
pub(crate) use unix::{wait_readable, WakeSignal};
#[cfg(windows)]
pub(crate) use windows::{wait_readable, WakeSignal};

#[cfg(unix)]
mod unix {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::os::fd::AsRawFd;

    use crate::pipe::Pipe;

    /// Self-pipe used to interrupt a blocked readiness wait
    #[derive(Debug)]
    pub(crate) struct WakeSignal {
        reader: File,
        writer: File,
    }

    impl WakeSignal {
        pub(crate) fn new() -> io::Result<Self> {
            let (writer, reader) = Pipe::new()?.into_parts();
            let reader = File::from(reader);
            let writer = File::from(writer);
            for file in [&reader, &writer] {
                let flags = OFlag::from_bits_truncate(fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)?);
                fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
            }
            Ok(Self { reader, writer })
        }

        /// Wake any thread blocked in [`wait_readable`] on this signal
        pub(crate) fn raise(&self) {
            // A full pipe already holds a pending wake-up.
            match (&self.writer).write(&[1]) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => tracing::warn!(error = %e, "Failed to raise wake signal"),
            }
        }

        /// Drop every pending wake-up
        pub(crate) fn clear(&self) {
            let mut sink = [0u8; 64];
            loop {
                match (&self.reader).read(&mut sink) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        }
    }

    /// Block until `source` is readable or `wake` is raised.
    ///
    /// The interval is unused here: `poll(2)` waits on both descriptors at once.
    pub(crate) fn wait_readable<S: AsFd + ?Sized>(
        source: &S,
        wake: Option<&WakeSignal>,
        _poll_interval: Duration,
    ) -> io::Result<Readiness> {
        loop {
            let mut fds = vec![PollFd::new(source.as_fd(), PollFlags::POLLIN)];
            if let Some(wake) = wake {
                fds.push(PollFd::new(wake.reader.as_fd(), PollFlags::POLLIN));
            }

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }

            let fired = |fd: &PollFd<'_>| fd.revents().is_some_and(|events| !events.is_empty());
            if fds.get(1).is_some_and(fired) {
                return Ok(Readiness::Woken);
            }
            if fired(&fds[0]) {
                return Ok(Readiness::Readable);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::os::windows::io::AsRawHandle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::System::Pipes::PeekNamedPipe;

    /// Flag checked between readiness polls
    #[derive(Debug, Default)]
    pub(crate) struct WakeSignal {
        raised: AtomicBool,
    }

    impl WakeSignal {
        pub(crate) fn new() -> io::Result<Self> {
            Ok(Self::default())
        }

        pub(crate) fn raise(&self) {
            self.raised.store(true, Ordering::SeqCst);
        }

        pub(crate) fn clear(&self) {
            self.raised.store(false, Ordering::SeqCst);
        }

        fn is_raised(&self) -> bool {
            self.raised.load(Ordering::SeqCst)
        }
    }

    /// Poll `source` every `poll_interval` until bytes are buffered, the
    /// pipe is broken (EOF), or `wake` is raised.
    ///
    /// Handles that are not pipes make `PeekNamedPipe` fail and are reported
    /// readable straight away; reads on them do not wait for a writer.
    pub(crate) fn wait_readable<S: AsHandle + ?Sized>(
        source: &S,
        wake: Option<&WakeSignal>,
        poll_interval: Duration,
    ) -> io::Result<Readiness> {
        let handle = source.as_handle().as_raw_handle() as HANDLE;
        loop {
            if wake.is_some_and(WakeSignal::is_raised) {
                return Ok(Readiness::Woken);
            }

            let mut available: u32 = 0;
            // SAFETY: `handle` is borrowed from `source` for the whole call and
            // the only out-pointer is a valid local.
            let peeked = unsafe {
                PeekNamedPipe(
                    handle,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null_mut(),
                    &mut available,
                    std::ptr::null_mut(),
                )
            };
            if peeked == 0 || available > 0 {
                return Ok(Readiness::Readable);
            }
            thread::sleep(poll_interval);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipe::Pipe;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    const INTERVAL: Duration = Duration::from_millis(10);

    #[test]
    fn test_readable_when_data_buffered() {
        let Pipe {
            mut side_in,
            side_out,
        } = Pipe::new().unwrap();
        side_in.write_all(b"x").unwrap();
        assert_eq!(
            wait_readable(&side_out, None, INTERVAL).unwrap(),
            Readiness::Readable
        );
    }

    #[test]
    fn test_readable_at_eof() {
        let Pipe { side_in, side_out } = Pipe::new().unwrap();
        drop(side_in);
        assert_eq!(
            wait_readable(&side_out, None, INTERVAL).unwrap(),
            Readiness::Readable
        );
    }

    #[test]
    fn test_wake_interrupts_idle_wait() {
        let Pipe { side_in, side_out } = Pipe::new().unwrap();
        let wake = Arc::new(WakeSignal::new().unwrap());

        let raiser = Arc::clone(&wake);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            raiser.raise();
        });

        assert_eq!(
            wait_readable(&side_out, Some(&wake), INTERVAL).unwrap(),
            Readiness::Woken
        );
        handle.join().unwrap();

        wake.clear();
        wake.raise();
        wake.raise();
        wake.clear();
        drop(side_in);
        assert_eq!(
            wait_readable(&side_out, Some(&wake), INTERVAL).unwrap(),
            Readiness::Readable
        );
    }
}
