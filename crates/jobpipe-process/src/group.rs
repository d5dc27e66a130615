//! Process groups
//!
//! A group signals, pauses and kills its members as one unit. On POSIX the
//! first member to start becomes the leader and every later member is
//! spawned into the leader's process group; on Windows members are assigned
//! to a Job Object. Either way descendants of members are reached too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProcessError, Result};
use crate::platform::{Admission, GroupBackend, NativeGroup};
use crate::process::{Process, ProcessStatus};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

struct Member {
    process: Arc<Process>,
    /// Reached by group-wide platform calls
    contained: bool,
}

#[derive(Default)]
struct Roster {
    members: Vec<Member>,
    started: bool,
}

/// A set of processes controlled together
pub struct ProcessGroup {
    id: u64,
    backend: NativeGroup,
    roster: Mutex<Roster>,
}

impl ProcessGroup {
    /// Create an empty group
    pub fn new() -> Result<Self> {
        let backend = NativeGroup::create()?;
        let id = NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed);
        debug!(group = id, "Process group created");
        Ok(Self {
            id,
            backend,
            roster: Mutex::new(Roster::default()),
        })
    }

    /// Process-wide unique id of this group
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Add a member. The first member added is the leader.
    ///
    /// Once the group has started, an unstarted process is started right
    /// away and a running one is moved into the group.
    pub fn add(&self, process: Arc<Process>) -> Result<()> {
        process.claim(self.id)?;
        let mut roster = self.roster.lock();
        let enlisted = if roster.started {
            self.enlist(&process)
        } else {
            Ok(false)
        };
        debug!(group = self.id, command = %process.config().display(), "Member added");
        roster.members.push(Member {
            process,
            contained: matches!(enlisted, Ok(true)),
        });
        enlisted.map(|_| ())
    }

    /// Start or admit one member; returns whether it is contained
    fn enlist(&self, process: &Process) -> Result<bool> {
        let admission = match process.status() {
            ProcessStatus::Init => {
                process.start_with(|cmd| self.backend.spawn(cmd))?;
                self.backend.admit(process, true)?
            }
            _ => self.backend.admit(process, false)?,
        };
        Ok(admission == Admission::Contained)
    }

    /// Start every member in insertion order.
    ///
    /// A member that fails to spawn does not stop the rest; the first
    /// failure is returned once all have been tried.
    pub fn start(&self) -> Result<()> {
        let mut roster = self.roster.lock();
        if roster.started {
            return Err(ProcessError::AlreadyStarted);
        }
        roster.started = true;

        let mut first_error = None;
        for member in roster.members.iter_mut() {
            match self.enlist(&member.process) {
                Ok(contained) => member.contained = contained,
                Err(e) => {
                    warn!(
                        group = self.id,
                        command = %member.process.config().display(),
                        error = %e,
                        "Member failed to start"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(group = self.id, members = roster.members.len(), "Process group started");
        first_error.map_or(Ok(()), Err)
    }

    /// Run `group_op` on the platform group, then `reached` on each member
    /// it covered and `member_op` on each member it cannot reach
    fn broadcast<G, R, M>(&self, group_op: G, reached: R, member_op: M) -> Result<()>
    where
        G: FnOnce(&NativeGroup) -> Result<()>,
        R: Fn(&Process),
        M: Fn(&Process) -> Result<()>,
    {
        let stragglers: Vec<Arc<Process>> = {
            let roster = self.roster.lock();
            if !roster.started {
                return Ok(());
            }
            group_op(&self.backend)?;
            let (contained, outside): (Vec<&Member>, Vec<&Member>) =
                roster.members.iter().partition(|m| m.contained);
            for member in contained {
                reached(&member.process);
            }
            outside.iter().map(|m| Arc::clone(&m.process)).collect()
        };
        for process in stragglers {
            member_op(&process)?;
        }
        Ok(())
    }

    /// Deliver a native signal to every member and their descendants
    pub fn signal(&self, signal: i32) -> Result<()> {
        self.broadcast(
            |group| group.signal(signal),
            |p| p.note_signal(signal),
            |p| p.signal(signal),
        )?;
        debug!(group = self.id, signal, "Group signalled");
        Ok(())
    }

    /// Ask every member to stop
    pub fn terminate(&self) -> Result<()> {
        self.broadcast(NativeGroup::terminate, |_| (), Process::terminate)?;
        info!(group = self.id, "Process group terminated");
        Ok(())
    }

    /// Force every member to stop, then wait for all of them
    pub fn kill(&self) -> Result<()> {
        self.broadcast(
            NativeGroup::kill,
            |_| (),
            |p| match p.status() {
                ProcessStatus::Init => Ok(()),
                _ => p.kill(),
            },
        )?;
        info!(group = self.id, "Process group killed");
        self.join()
    }

    /// Pause every started member
    pub fn pause(&self) -> Result<()> {
        self.for_started("pause", Process::pause)
    }

    /// Resume every started member
    pub fn unpause(&self) -> Result<()> {
        self.for_started("unpause", Process::unpause)
    }

    fn for_started(&self, action: &str, op: fn(&Process) -> Result<()>) -> Result<()> {
        let started: Vec<Arc<Process>> = {
            let roster = self.roster.lock();
            if !roster.started {
                return Err(ProcessError::Unsupported(format!(
                    "cannot {action} a group that has not started"
                )));
            }
            roster
                .members
                .iter()
                .filter(|m| m.process.status() != ProcessStatus::Init)
                .map(|m| Arc::clone(&m.process))
                .collect()
        };
        for process in &started {
            op(process)?;
        }
        debug!(group = self.id, action, members = started.len(), "Group job control applied");
        Ok(())
    }

    /// Block until every started member has finished
    pub fn join(&self) -> Result<()> {
        for process in self.started_members() {
            process.join()?;
        }
        Ok(())
    }

    /// Like [`ProcessGroup::join`]; returns false if `timeout` ran out first
    pub fn join_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        for process in self.started_members() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if process.join_timeout(remaining)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Wait for every member without blocking the async runtime
    pub async fn wait(self: &Arc<Self>) -> Result<()> {
        let group = Arc::clone(self);
        tokio::task::spawn_blocking(move || group.join())
            .await
            .map_err(|e| ProcessError::Join(e.to_string()))?
    }

    fn started_members(&self) -> Vec<Arc<Process>> {
        self.roster
            .lock()
            .members
            .iter()
            .filter(|m| m.process.status() != ProcessStatus::Init)
            .map(|m| Arc::clone(&m.process))
            .collect()
    }

    /// Init until something starts, Finished once every member has,
    /// Running otherwise
    pub fn status(&self) -> ProcessStatus {
        let roster = self.roster.lock();
        let statuses: Vec<ProcessStatus> =
            roster.members.iter().map(|m| m.process.status()).collect();

        if statuses.iter().all(|s| *s == ProcessStatus::Init) {
            ProcessStatus::Init
        } else if statuses.iter().all(|s| *s == ProcessStatus::Finished) {
            ProcessStatus::Finished
        } else {
            ProcessStatus::Running
        }
    }

    /// Whether `start` has been called
    pub fn is_started(&self) -> bool {
        self.roster.lock().started
    }

    /// The first member added
    pub fn leader(&self) -> Option<Arc<Process>> {
        self.roster
            .lock()
            .members
            .first()
            .map(|m| Arc::clone(&m.process))
    }

    /// Members in insertion order
    pub fn members(&self) -> Vec<Arc<Process>> {
        self.roster
            .lock()
            .members
            .iter()
            .map(|m| Arc::clone(&m.process))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.roster.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.lock().members.is_empty()
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roster = self.roster.lock();
        f.debug_struct("ProcessGroup")
            .field("id", &self.id)
            .field("members", &roster.members.len())
            .field("started", &roster.started)
            .finish()
    }
}
