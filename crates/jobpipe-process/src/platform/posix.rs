//! POSIX backend: signals and process groups

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{setpgid, Pid};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Admission, GroupBackend, ProcessBackend};
use crate::error::{ProcessError, Result};
use crate::process::Process;

fn platform(call: &'static str, errno: Errno) -> ProcessError {
    ProcessError::PlatformCall {
        call,
        source: errno.into(),
    }
}

fn to_signal(signal: i32) -> Result<Signal> {
    Signal::try_from(signal)
        .map_err(|_| ProcessError::Unsupported(format!("unknown signal number {signal}")))
}

fn pid_of(child: &Child) -> Pid {
    Pid::from_raw(child.id() as i32)
}

pub(crate) struct PosixProcess;

impl ProcessBackend for PosixProcess {
    type ExitWatch = Pid;

    fn exit_watch(child: &Child) -> Pid {
        pid_of(child)
    }

    fn wait_for_exit(pid: &Pid) -> io::Result<()> {
        loop {
            // SAFETY: an all-zero siginfo_t is a valid out-buffer for waitid.
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` outlives the call; WNOWAIT leaves the child
            // reapable so the exit status is still collected under the lock.
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid.as_raw() as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn signal(child: &Child, signal: i32) -> Result<()> {
        kill(pid_of(child), to_signal(signal)?).map_err(|e| platform("kill", e))
    }

    fn paused_after(signal: i32) -> Option<bool> {
        match signal {
            libc::SIGSTOP | libc::SIGTSTP | libc::SIGTTIN | libc::SIGTTOU => Some(true),
            libc::SIGCONT => Some(false),
            _ => None,
        }
    }

    fn terminate(child: &Child) -> Result<()> {
        Self::signal(child, libc::SIGTERM)
    }

    fn kill(child: &Child) -> Result<()> {
        Self::signal(child, libc::SIGKILL)
    }

    fn pause(child: &Child) -> Result<()> {
        Self::signal(child, libc::SIGSTOP)
    }

    fn unpause(child: &Child) -> Result<()> {
        Self::signal(child, libc::SIGCONT)
    }

    fn set_priority(child: &Child, priority: i32) -> Result<()> {
        // SAFETY: plain syscall on a pid we own.
        let rc =
            unsafe { libc::setpriority(libc::PRIO_PROCESS, child.id() as libc::id_t, priority) };
        if rc != 0 {
            return Err(ProcessError::last_os_error("setpriority"));
        }
        Ok(())
    }

    fn return_code(status: ExitStatus) -> i64 {
        match (status.code(), status.signal()) {
            (Some(code), _) => i64::from(code),
            (None, Some(signal)) => -i64::from(signal),
            (None, None) => -1,
        }
    }
}

/// Process group whose id is the leader's pid.
///
/// The id is cached when the leader is spawned rather than looked up later:
/// a leader that exits in its first time slice makes live lookups fail.
pub(crate) struct PosixGroup {
    pgid: Mutex<Option<Pid>>,
}

impl GroupBackend for PosixGroup {
    fn create() -> Result<Self> {
        Ok(Self {
            pgid: Mutex::new(None),
        })
    }

    fn spawn(&self, command: &mut Command) -> io::Result<Child> {
        let leader = *self.pgid.lock();
        // Joined in the child before exec, so even an instantly exiting
        // member is never observed outside the group.
        command.process_group(leader.map_or(0, Pid::as_raw));
        match command.spawn() {
            // Every process of the old group has been reaped. Nothing is
            // left to contain, so this member founds the group afresh.
            Err(e) if leader.is_some() && e.raw_os_error() == Some(libc::EPERM) => {
                warn!(pgid = ?leader, "Process group is gone; electing a new leader");
                *self.pgid.lock() = None;
                command.process_group(0);
                command.spawn()
            }
            result => result,
        }
    }

    fn admit(&self, member: &Process, spawned_here: bool) -> Result<Admission> {
        let Some(pid) = member.pid() else {
            return Ok(Admission::Outside);
        };
        let pid = Pid::from_raw(pid as i32);
        let mut pgid = self.pgid.lock();

        if spawned_here {
            if pgid.is_none() {
                debug!(pgid = pid.as_raw(), "Group leader elected");
                *pgid = Some(pid);
            }
            return Ok(Admission::Contained);
        }

        let target = pgid.unwrap_or(pid);
        match setpgid(pid, target) {
            Ok(()) => {
                if pgid.is_none() {
                    debug!(pgid = pid.as_raw(), "Running process made group leader");
                    *pgid = Some(pid);
                }
                Ok(Admission::Contained)
            }
            Err(Errno::ESRCH) => {
                debug!(pid = pid.as_raw(), "Process exited before joining the group");
                Ok(Admission::Outside)
            }
            // EACCES once the child has exec'd: it stays in its own group and
            // group-wide calls reach it individually.
            Err(e) => {
                warn!(
                    pid = pid.as_raw(),
                    pgid = target.as_raw(),
                    error = %e,
                    "Cannot move running process into the group"
                );
                Ok(Admission::Outside)
            }
        }
    }

    fn signal(&self, signal: i32) -> Result<()> {
        let Some(pgid) = *self.pgid.lock() else {
            return Ok(());
        };
        match killpg(pgid, to_signal(signal)?) {
            Ok(()) => {
                debug!(pgid = pgid.as_raw(), signal, "Signal delivered to process group");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(platform("killpg", e)),
        }
    }

    fn terminate(&self) -> Result<()> {
        self.signal(libc::SIGTERM)
    }

    fn kill(&self) -> Result<()> {
        self.signal(libc::SIGKILL)
    }
}
