//! Windows backend: Job Objects and thread suspension
//!
//! Windows has no signals. Termination requests are forced, and pausing
//! suspends every thread of the process found in a Toolhelp snapshot.

use std::io;
use std::mem;
use std::os::windows::io::AsRawHandle;
use std::process::{Child, Command, ExitStatus};
use std::ptr;

use tracing::{debug, trace, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, HANDLE, INVALID_HANDLE_VALUE, STILL_ACTIVE, WAIT_OBJECT_0,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, TerminateJobObject,
};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenThread, ResumeThread, SetPriorityClass, SuspendThread,
    TerminateProcess, WaitForSingleObject, ABOVE_NORMAL_PRIORITY_CLASS,
    BELOW_NORMAL_PRIORITY_CLASS, HIGH_PRIORITY_CLASS, IDLE_PRIORITY_CLASS, INFINITE,
    NORMAL_PRIORITY_CLASS, PROCESS_CREATION_FLAGS, REALTIME_PRIORITY_CLASS,
    THREAD_SUSPEND_RESUME,
};

use super::signals::{SIGKILL, SIGTERM};
use super::{Admission, GroupBackend, ProcessBackend};
use crate::error::{ProcessError, Result};
use crate::process::Process;

/// Exit code given to forcibly terminated processes
const TERMINATED_EXIT_CODE: u32 = 1;

/// Process handle carried as an integer so it can move to the reaper thread.
/// Only valid while the owning `Child` is alive.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawProcess(isize);

impl RawProcess {
    fn of(child: &Child) -> Self {
        Self(child.as_raw_handle() as isize)
    }

    fn handle(self) -> HANDLE {
        self.0 as HANDLE
    }

    fn has_exited(self) -> bool {
        let mut code = 0u32;
        // SAFETY: valid process handle, `code` outlives the call.
        let ok = unsafe { GetExitCodeProcess(self.handle(), &mut code) };
        ok != 0 && code != STILL_ACTIVE as u32
    }
}

struct HandleGuard(HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        // SAFETY: the guard owns the handle.
        unsafe { CloseHandle(self.0) };
    }
}

#[derive(Clone, Copy)]
enum ThreadAction {
    Suspend,
    Resume,
}

/// Suspend or resume every thread owned by `pid`
fn for_each_thread(pid: u32, action: ThreadAction) -> Result<()> {
    // SAFETY: plain snapshot call, handle checked below.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(ProcessError::last_os_error("CreateToolhelp32Snapshot"));
    }
    let _snapshot = HandleGuard(snapshot);

    // SAFETY: THREADENTRY32 is plain data; dwSize set before use.
    let mut entry: THREADENTRY32 = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;

    let mut touched = 0usize;
    // SAFETY: `entry` is a properly sized out-buffer.
    let mut more = unsafe { Thread32First(snapshot, &mut entry) } != 0;
    while more {
        if entry.th32OwnerProcessID == pid {
            // SAFETY: thread id from the snapshot; null checked.
            let thread = unsafe { OpenThread(THREAD_SUSPEND_RESUME, 0, entry.th32ThreadID) };
            if !thread.is_null() {
                let _thread = HandleGuard(thread);
                // SAFETY: handle opened with THREAD_SUSPEND_RESUME.
                let previous = unsafe {
                    match action {
                        ThreadAction::Suspend => SuspendThread(thread),
                        ThreadAction::Resume => ResumeThread(thread),
                    }
                };
                if previous == u32::MAX {
                    return Err(ProcessError::last_os_error(match action {
                        ThreadAction::Suspend => "SuspendThread",
                        ThreadAction::Resume => "ResumeThread",
                    }));
                }
                touched += 1;
            }
        }
        // SAFETY: same snapshot and buffer as above.
        more = unsafe { Thread32Next(snapshot, &mut entry) } != 0;
    }

    trace!(pid, threads = touched, "Thread states changed");
    Ok(())
}

/// Map the POSIX nice scale onto priority classes
fn priority_class(priority: i32) -> PROCESS_CREATION_FLAGS {
    match priority {
        i32::MIN..=-16 => REALTIME_PRIORITY_CLASS,
        -15..=-10 => HIGH_PRIORITY_CLASS,
        -9..=-1 => ABOVE_NORMAL_PRIORITY_CLASS,
        0 => NORMAL_PRIORITY_CLASS,
        1..=9 => BELOW_NORMAL_PRIORITY_CLASS,
        _ => IDLE_PRIORITY_CLASS,
    }
}

fn terminate_process(process: RawProcess) -> Result<()> {
    // SAFETY: valid process handle.
    if unsafe { TerminateProcess(process.handle(), TERMINATED_EXIT_CODE) } != 0 {
        return Ok(());
    }
    let err = ProcessError::last_os_error("TerminateProcess");
    // Access denied is what a process that has already exited reports.
    if process.has_exited() {
        return Ok(());
    }
    Err(err)
}

pub(crate) struct WindowsProcess;

impl ProcessBackend for WindowsProcess {
    type ExitWatch = RawProcess;

    fn exit_watch(child: &Child) -> RawProcess {
        RawProcess::of(child)
    }

    fn wait_for_exit(process: &RawProcess) -> io::Result<()> {
        // SAFETY: the Child owning the handle lives in the shared state the
        // reaper thread keeps alive.
        match unsafe { WaitForSingleObject(process.handle(), INFINITE) } {
            WAIT_OBJECT_0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn signal(child: &Child, signal: i32) -> Result<()> {
        match signal {
            SIGTERM | SIGKILL => Self::kill(child),
            other => Err(ProcessError::Unsupported(format!(
                "signal {other} has no Windows equivalent"
            ))),
        }
    }

    fn paused_after(_signal: i32) -> Option<bool> {
        None
    }

    fn terminate(child: &Child) -> Result<()> {
        Self::kill(child)
    }

    fn kill(child: &Child) -> Result<()> {
        terminate_process(RawProcess::of(child))
    }

    fn pause(child: &Child) -> Result<()> {
        for_each_thread(child.id(), ThreadAction::Suspend)
    }

    fn unpause(child: &Child) -> Result<()> {
        for_each_thread(child.id(), ThreadAction::Resume)
    }

    fn set_priority(child: &Child, priority: i32) -> Result<()> {
        let handle = RawProcess::of(child).handle();
        // SAFETY: valid process handle.
        let ok = unsafe { SetPriorityClass(handle, priority_class(priority)) };
        if ok == 0 {
            return Err(ProcessError::last_os_error("SetPriorityClass"));
        }
        Ok(())
    }

    fn return_code(status: ExitStatus) -> i64 {
        status.code().map_or(-1, |code| i64::from(code as u32))
    }
}

/// Job Object holding every member and, through inheritance, their
/// descendants.
pub(crate) struct JobObject {
    job: isize,
}

impl JobObject {
    fn handle(&self) -> HANDLE {
        self.job as HANDLE
    }
}

impl GroupBackend for JobObject {
    fn create() -> Result<Self> {
        // SAFETY: anonymous job with default security.
        let job = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
        if job.is_null() {
            return Err(ProcessError::GroupCreationFailed(io::Error::last_os_error()));
        }
        debug!("Job object created");
        Ok(Self { job: job as isize })
    }

    // TODO: spawn suspended and resume after assignment so grandchildren
    // forked in the first instant are contained too.
    fn spawn(&self, command: &mut Command) -> io::Result<Child> {
        command.spawn()
    }

    fn admit(&self, member: &Process, _spawned_here: bool) -> Result<Admission> {
        let Some(process) = member.with_child(RawProcess::of) else {
            return Ok(Admission::Outside);
        };
        // SAFETY: both handles are valid.
        if unsafe { AssignProcessToJobObject(self.handle(), process.handle()) } != 0 {
            return Ok(Admission::Contained);
        }
        let err = io::Error::last_os_error();
        if process.has_exited() {
            debug!("Process exited before joining the job");
        } else {
            warn!(error = %err, "Cannot assign process to job; it will be handled individually");
        }
        Ok(Admission::Outside)
    }

    fn signal(&self, signal: i32) -> Result<()> {
        match signal {
            SIGTERM | SIGKILL => self.kill(),
            other => Err(ProcessError::Unsupported(format!(
                "signal {other} has no Windows equivalent"
            ))),
        }
    }

    fn terminate(&self) -> Result<()> {
        self.kill()
    }

    fn kill(&self) -> Result<()> {
        // SAFETY: the job handle is owned by self.
        if unsafe { TerminateJobObject(self.handle(), TERMINATED_EXIT_CODE) } == 0 {
            return Err(ProcessError::last_os_error("TerminateJobObject"));
        }
        debug!("Job object terminated");
        Ok(())
    }
}

impl Drop for JobObject {
    fn drop(&mut self) {
        // SAFETY: the job handle is owned by self and closed once.
        unsafe { CloseHandle(self.handle()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_classes() {
        assert_eq!(priority_class(0), NORMAL_PRIORITY_CLASS);
        assert_eq!(priority_class(19), IDLE_PRIORITY_CLASS);
        assert_eq!(priority_class(-20), REALTIME_PRIORITY_CLASS);
    }

    #[test]
    fn test_unsupported_signal() {
        let job = JobObject::create().unwrap();
        assert!(matches!(job.signal(2), Err(ProcessError::Unsupported(_))));
    }
}
