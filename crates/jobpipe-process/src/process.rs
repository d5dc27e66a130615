//! Single child process with job control

use std::fmt;
use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, Result};
use crate::platform::{NativeProcess, ProcessBackend};

type ExitWatch = <NativeProcess as ProcessBackend>::ExitWatch;

/// Lifecycle state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not started yet
    Init,
    /// Started and not paused
    Running,
    /// Paused through this handle
    Paused,
    /// Exited and reaped
    Finished,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
        };
        f.write_str(label)
    }
}

#[derive(Default)]
struct StdioBindings {
    stdin: Option<Stdio>,
    stdout: Option<Stdio>,
    stderr: Option<Stdio>,
    /// Set when a failed spawn used up the bound streams
    spent: bool,
}

impl StdioBindings {
    /// Move the bound streams into `cmd`; returns whether any were bound
    fn apply(&mut self, cmd: &mut Command) -> bool {
        let mut bound = false;
        if let Some(stdin) = self.stdin.take() {
            cmd.stdin(stdin);
            bound = true;
        }
        if let Some(stdout) = self.stdout.take() {
            cmd.stdout(stdout);
            bound = true;
        }
        if let Some(stderr) = self.stderr.take() {
            cmd.stderr(stderr);
            bound = true;
        }
        bound
    }
}

#[derive(Default)]
struct State {
    stdio: StdioBindings,
    child: Option<Child>,
    /// Return code, set exactly once by the reaper
    exit: Option<i64>,
    paused: bool,
    priority: Option<i32>,
}

impl State {
    /// The child, if it has not been reaped. Signals only go through here so
    /// a recycled pid is never hit.
    fn live_child(&self) -> Option<&Child> {
        match self.exit {
            Some(_) => None,
            None => self.child.as_ref(),
        }
    }

    /// Follow job-control signals in the paused flag while the child lives
    fn track_signal(&mut self, signal: i32) {
        if self.live_child().is_none() {
            return;
        }
        if let Some(paused) = NativeProcess::paused_after(signal) {
            self.paused = paused;
        }
    }

    fn status(&self) -> ProcessStatus {
        match (&self.child, self.exit, self.paused) {
            (None, _, _) => ProcessStatus::Init,
            (Some(_), Some(_), _) => ProcessStatus::Finished,
            (Some(_), None, true) => ProcessStatus::Paused,
            (Some(_), None, false) => ProcessStatus::Running,
        }
    }
}

struct Shared {
    state: Mutex<State>,
    exited: Condvar,
}

/// How often the reaper polls when the platform exit watch is unavailable
const REAP_POLL: Duration = Duration::from_millis(50);

impl Shared {
    /// Reaper thread body: wait without reaping, then reap under the lock
    fn reap(&self, pid: u32, watch: ExitWatch) {
        if let Err(e) = NativeProcess::wait_for_exit(&watch) {
            warn!(pid, error = %e, "Exit notification failed; polling for exit");
        }
        self.collect(pid);
    }

    /// Reap the child without ever blocking while the state lock is held
    fn collect(&self, pid: u32) {
        let code = loop {
            let mut state = self.state.lock();
            let Some(child) = state.child.as_mut() else {
                return;
            };
            let code = match child.try_wait() {
                Ok(Some(status)) => NativeProcess::return_code(status),
                Ok(None) => {
                    drop(state);
                    thread::sleep(REAP_POLL);
                    continue;
                }
                Err(e) => {
                    warn!(pid, error = %e, "Exit status lost");
                    -1
                }
            };
            state.exit = Some(code);
            state.paused = false;
            break code;
        };

        self.exited.notify_all();
        info!(pid, return_code = code, "Process exited");
    }
}

/// A child process.
///
/// Every started process is watched by a reaper thread, so exit is noticed
/// even if nobody joins. `Process` is shared as `Arc<Process>`; all methods
/// take `&self`.
pub struct Process {
    config: ProcessConfig,
    shared: Arc<Shared>,
    group: OnceLock<u64>,
}

impl Process {
    /// Create a process that has not been started
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                exited: Condvar::new(),
            }),
            group: OnceLock::new(),
        }
    }

    /// Shorthand for `Process::new(ProcessConfig::from_argv(argv)?)`
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        Ok(Self::new(ProcessConfig::from_argv(argv)?))
    }

    /// Bind the child's stdin. Unbound streams are inherited.
    pub fn stdin(self, stdio: impl Into<Stdio>) -> Self {
        self.shared.state.lock().stdio.stdin = Some(stdio.into());
        self
    }

    /// Bind the child's stdout
    pub fn stdout(self, stdio: impl Into<Stdio>) -> Self {
        self.shared.state.lock().stdio.stdout = Some(stdio.into());
        self
    }

    /// Bind the child's stderr
    pub fn stderr(self, stdio: impl Into<Stdio>) -> Self {
        self.shared.state.lock().stdio.stderr = Some(stdio.into());
        self
    }

    /// Configuration this process was built from
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Spawn the child
    pub fn start(&self) -> Result<()> {
        self.start_with(Command::spawn).map(|_| ())
    }

    /// Spawn through `spawn`, which may adjust the command first
    pub(crate) fn start_with<F>(&self, spawn: F) -> Result<u32>
    where
        F: FnOnce(&mut Command) -> io::Result<Child>,
    {
        let mut state = self.shared.state.lock();
        if state.child.is_some() {
            return Err(ProcessError::AlreadyStarted);
        }

        if state.stdio.spent {
            // Retrying would silently fall back to inherited streams.
            return Err(ProcessError::Unsupported(
                "cannot restart: a failed start consumed the stdio bindings".to_string(),
            ));
        }

        let mut cmd = self.config.command();
        let bound = state.stdio.apply(&mut cmd);

        debug!(command = %self.config.display(), "Spawning process");
        let child = match spawn(&mut cmd) {
            Ok(child) => child,
            Err(source) => {
                state.stdio.spent = bound;
                return Err(ProcessError::SpawnFailed {
                    command: self.config.display(),
                    source,
                });
            }
        };
        // Release our copies of the bound stdio ends.
        drop(cmd);

        let pid = child.id();
        info!(pid, command = %self.config.display(), "Process spawned");

        if let Some(priority) = state.priority.or(self.config.priority) {
            if let Err(e) = NativeProcess::set_priority(&child, priority) {
                warn!(pid, priority, error = %e, "Failed to apply priority");
            }
        }

        let watch = NativeProcess::exit_watch(&child);
        state.child = Some(child);
        drop(state);

        self.spawn_reaper(pid, watch)?;
        Ok(pid)
    }

    fn spawn_reaper(&self, pid: u32, watch: ExitWatch) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("reaper-{pid}"))
            .spawn(move || shared.reap(pid, watch));

        if let Err(source) = spawned {
            // Nobody would ever record the exit; take the child down now.
            let mut state = self.shared.state.lock();
            if let Some(child) = state.child.as_mut() {
                let _ = child.kill();
                let code = child.wait().map_or(-1, NativeProcess::return_code);
                state.exit = Some(code);
            }
            drop(state);
            self.shared.exited.notify_all();
            return Err(ProcessError::PlatformCall {
                call: "spawn reaper thread",
                source,
            });
        }
        Ok(())
    }

    /// Send a native signal. A no-op once the process has finished.
    pub fn signal(&self, signal: i32) -> Result<()> {
        let mut state = self.shared.state.lock();
        let Some(child) = state.live_child() else {
            return Ok(());
        };
        let pid = child.id();
        NativeProcess::signal(child, signal)?;
        debug!(pid, signal, "Signal delivered");
        state.track_signal(signal);
        Ok(())
    }

    /// Record the effect of `signal` delivered by a group-wide call
    pub(crate) fn note_signal(&self, signal: i32) {
        self.shared.state.lock().track_signal(signal);
    }

    /// Ask the process to stop
    pub fn terminate(&self) -> Result<()> {
        let state = self.shared.state.lock();
        match state.live_child() {
            Some(child) => {
                NativeProcess::terminate(child)?;
                debug!(pid = child.id(), "Termination requested");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Force the process to stop and wait for it to be reaped
    pub fn kill(&self) -> Result<()> {
        {
            let state = self.shared.state.lock();
            let Some(child) = state.live_child() else {
                return Ok(());
            };
            NativeProcess::kill(child)?;
            info!(pid = child.id(), "Process killed");
        }
        self.join().map(|_| ())
    }

    /// Stop scheduling the process
    pub fn pause(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.child.is_none() {
            return Err(ProcessError::Unsupported(
                "cannot pause a process that has not started".to_string(),
            ));
        }
        let Some(child) = state.live_child() else {
            return Ok(());
        };
        let pid = child.id();
        NativeProcess::pause(child)?;
        state.paused = true;
        debug!(pid, "Process paused");
        Ok(())
    }

    /// Resume a paused process
    pub fn unpause(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.child.is_none() {
            return Err(ProcessError::Unsupported(
                "cannot unpause a process that has not started".to_string(),
            ));
        }
        let Some(child) = state.live_child() else {
            return Ok(());
        };
        let pid = child.id();
        NativeProcess::unpause(child)?;
        state.paused = false;
        debug!(pid, "Process resumed");
        Ok(())
    }

    /// Current lifecycle state
    pub fn status(&self) -> ProcessStatus {
        self.shared.state.lock().status()
    }

    /// Check if the process has exited and been reaped
    pub fn is_finished(&self) -> bool {
        self.status() == ProcessStatus::Finished
    }

    /// OS process id once started
    pub fn pid(&self) -> Option<u32> {
        self.shared.state.lock().child.as_ref().map(Child::id)
    }

    /// Return code once finished: the exit code, or the negated signal
    /// number on POSIX
    pub fn return_code(&self) -> Option<i64> {
        self.shared.state.lock().exit
    }

    /// Scheduling priority, as configured or last set
    pub fn priority(&self) -> Option<i32> {
        self.shared.state.lock().priority.or(self.config.priority)
    }

    /// Change scheduling priority; applied immediately if running
    pub fn set_priority(&self, priority: i32) -> Result<()> {
        let mut state = self.shared.state.lock();
        if let Some(child) = state.live_child() {
            NativeProcess::set_priority(child, priority)?;
            debug!(pid = child.id(), priority, "Priority changed");
        }
        state.priority = Some(priority);
        Ok(())
    }

    /// Block until the process finishes; returns the return code.
    /// Any number of threads may join concurrently.
    pub fn join(&self) -> Result<i64> {
        let mut state = self.shared.state.lock();
        if state.child.is_none() {
            return Err(ProcessError::Unsupported(
                "cannot join a process that has not started".to_string(),
            ));
        }
        loop {
            if let Some(code) = state.exit {
                return Ok(code);
            }
            self.shared.exited.wait(&mut state);
        }
    }

    /// Like [`Process::join`], giving up after `timeout`
    pub fn join_timeout(&self, timeout: Duration) -> Result<Option<i64>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        if state.child.is_none() {
            return Err(ProcessError::Unsupported(
                "cannot join a process that has not started".to_string(),
            ));
        }
        loop {
            if let Some(code) = state.exit {
                return Ok(Some(code));
            }
            if self.shared.exited.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.exit);
            }
        }
    }

    /// Wait without blocking the async runtime, honouring the configured
    /// timeout
    pub async fn wait(self: &Arc<Self>) -> Result<i64> {
        let process = Arc::clone(self);
        let timeout = self.config.timeout;

        let code = tokio::task::spawn_blocking(move || match timeout {
            Some(timeout) => process.join_timeout(timeout),
            None => process.join().map(Some),
        })
        .await
        .map_err(|e| ProcessError::Join(e.to_string()))??;

        code.ok_or_else(|| ProcessError::Timeout {
            seconds: timeout.map_or(0, |t| t.as_secs()),
        })
    }

    /// Tie this process to a group; a process joins at most one
    pub(crate) fn claim(&self, group: u64) -> Result<()> {
        self.group
            .set(group)
            .map_err(|_| ProcessError::AlreadyGrouped)
    }

    /// Id of the group this process belongs to
    pub fn group_id(&self) -> Option<u64> {
        self.group.get().copied()
    }

    #[cfg_attr(unix, allow(dead_code))]
    pub(crate) fn with_child<R>(&self, f: impl FnOnce(&Child) -> R) -> Option<R> {
        self.shared.state.lock().child.as_ref().map(f)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Process")
            .field("command", &self.config.display())
            .field("pid", &state.child.as_ref().map(Child::id))
            .field("status", &state.status())
            .field("return_code", &state.exit)
            .finish()
    }
}
