//! Platform job-control backends
//!
//! One backend pair is compiled in per target: POSIX process groups and
//! signals, or Windows Job Objects and thread suspension. Callers only ever
//! see [`NativeProcess`] and [`NativeGroup`] through the two traits below.

use std::io;
use std::process::{Child, Command};

use crate::error::Result;
use crate::process::Process;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use posix::{PosixGroup as NativeGroup, PosixProcess as NativeProcess};
#[cfg(windows)]
pub(crate) use windows::{JobObject as NativeGroup, WindowsProcess as NativeProcess};

/// Native signal numbers understood by `signal` on this platform
pub mod signals {
    #[cfg(unix)]
    pub use libc::{SIGCONT, SIGHUP, SIGINT, SIGKILL, SIGSTOP, SIGTERM};

    /// Forced termination
    #[cfg(windows)]
    pub const SIGKILL: i32 = 9;
    /// Termination request; forced on Windows
    #[cfg(windows)]
    pub const SIGTERM: i32 = 15;
}

/// Per-process operations against a live OS child
pub(crate) trait ProcessBackend {
    /// What the reaper thread needs to wait for exit without the child
    type ExitWatch: Send + 'static;

    fn exit_watch(child: &Child) -> Self::ExitWatch;

    /// Block until the process exits, leaving it unreaped
    fn wait_for_exit(watch: &Self::ExitWatch) -> io::Result<()>;

    fn signal(child: &Child, signal: i32) -> Result<()>;

    /// Pause state implied by having delivered `signal`, if any
    fn paused_after(signal: i32) -> Option<bool>;

    fn terminate(child: &Child) -> Result<()>;

    fn kill(child: &Child) -> Result<()>;

    fn pause(child: &Child) -> Result<()>;

    fn unpause(child: &Child) -> Result<()>;

    fn set_priority(child: &Child, priority: i32) -> Result<()>;

    /// Platform-native return code
    fn return_code(status: std::process::ExitStatus) -> i64;
}

/// Whether a member ended up inside the platform group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Group-wide operations reach it
    Contained,
    /// It must be signalled on its own
    Outside,
}

/// Group-wide operations
pub(crate) trait GroupBackend: Send + Sync + Sized {
    fn create() -> Result<Self>;

    /// Spawn the next member so it lands in the group before it runs
    fn spawn(&self, command: &mut Command) -> io::Result<Child>;

    /// Record a member after spawn; `spawned_here` is false for processes
    /// that were started independently and must be moved in
    fn admit(&self, member: &Process, spawned_here: bool) -> Result<Admission>;

    fn signal(&self, signal: i32) -> Result<()>;

    fn terminate(&self) -> Result<()>;

    fn kill(&self) -> Result<()>;
}
