//! Group-wide job control against real children

#![cfg(unix)]

use std::io::Read;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use jobpipe_plumbing::{Pipe, PipeReader};
use jobpipe_process::{signals, Process, ProcessConfig, ProcessGroup, ProcessStatus};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn echo(word: &str) -> (Arc<Process>, PipeReader) {
    let (writer, reader) = Pipe::new().unwrap().into_parts();
    let process = Process::new(ProcessConfig::new("sh").args(["-c", &format!("echo {word}")]));
    (Arc::new(process.stdout(writer)), reader)
}

fn sleeper() -> Arc<Process> {
    Arc::new(Process::new(ProcessConfig::new("sleep").arg("30")))
}

fn read_all(mut reader: PipeReader) -> String {
    let mut out = String::new();
    reader.read_to_string(&mut out).unwrap();
    out
}

#[test]
fn test_three_member_group_output() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    let mut readers = Vec::new();
    for word in ["spam", "eggs", "vikings"] {
        let (process, reader) = echo(word);
        group.add(process).unwrap();
        readers.push(reader);
    }

    group.start().unwrap();
    group.join().unwrap();

    let outputs: Vec<String> = readers.into_iter().map(read_all).collect();
    assert_eq!(outputs, ["spam\n", "eggs\n", "vikings\n"]);
    assert_eq!(group.status(), ProcessStatus::Finished);
    for member in group.members() {
        assert_eq!(member.return_code(), Some(0));
    }
}

#[test]
fn test_kill_reaches_descendants() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    let (writer, mut reader) = Pipe::new().unwrap().into_parts();
    // The background sleep inherits stdout and is not itself a member.
    let member = Process::new(ProcessConfig::new("sh").args(["-c", "sleep 30 & wait"]));
    group.add(Arc::new(member.stdout(writer))).unwrap();
    group.start().unwrap();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut sink = Vec::new();
        let _ = reader.read_to_end(&mut sink);
        let _ = tx.send(());
    });

    thread::sleep(Duration::from_millis(200));
    group.kill().unwrap();

    // EOF arrives only once the grandchild holding the write end is gone.
    rx.recv_timeout(Duration::from_secs(10))
        .expect("descendant survived the group kill");
}

#[test]
fn test_add_after_start_is_contained() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    let leader = sleeper();
    group.add(Arc::clone(&leader)).unwrap();
    group.start().unwrap();

    let late = sleeper();
    group.add(Arc::clone(&late)).unwrap();
    assert_eq!(late.status(), ProcessStatus::Running);

    group.kill().unwrap();
    assert_eq!(leader.return_code(), Some(-i64::from(signals::SIGKILL)));
    assert_eq!(late.return_code(), Some(-i64::from(signals::SIGKILL)));
}

#[test]
fn test_independently_started_member_still_signalled() {
    init_tracing();
    let outsider = sleeper();
    outsider.start().unwrap();
    // Let it exec so it can no longer change process group.
    thread::sleep(Duration::from_millis(100));

    let group = ProcessGroup::new().unwrap();
    group.add(sleeper()).unwrap();
    group.add(Arc::clone(&outsider)).unwrap();
    group.start().unwrap();

    group.terminate().unwrap();
    assert!(group.join_timeout(Duration::from_secs(10)).unwrap());
    assert_eq!(outsider.return_code(), Some(-i64::from(signals::SIGTERM)));
}

#[test]
fn test_quick_leader_does_not_strand_later_members() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    let leader = Arc::new(Process::new(ProcessConfig::new("true")));
    group.add(Arc::clone(&leader)).unwrap();
    group.start().unwrap();
    leader.join().unwrap();
    // Give the reaper time to collect the leader and empty its group.
    thread::sleep(Duration::from_millis(100));

    let follower = sleeper();
    group.add(Arc::clone(&follower)).unwrap();
    assert_eq!(follower.status(), ProcessStatus::Running);

    group.kill().unwrap();
    assert_eq!(follower.return_code(), Some(-i64::from(signals::SIGKILL)));
}

#[test]
fn test_group_pause_and_signal() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    let first = sleeper();
    let second = sleeper();
    group.add(Arc::clone(&first)).unwrap();
    group.add(Arc::clone(&second)).unwrap();
    group.start().unwrap();

    group.pause().unwrap();
    assert_eq!(first.status(), ProcessStatus::Paused);
    assert_eq!(second.status(), ProcessStatus::Paused);
    assert_eq!(group.status(), ProcessStatus::Running);

    group.unpause().unwrap();
    assert_eq!(first.status(), ProcessStatus::Running);

    group.signal(signals::SIGTERM).unwrap();
    assert!(group.join_timeout(Duration::from_secs(10)).unwrap());
    assert_eq!(first.return_code(), Some(-i64::from(signals::SIGTERM)));
    assert_eq!(second.return_code(), Some(-i64::from(signals::SIGTERM)));
}

#[test]
fn test_group_job_control_signals_update_status() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    let first = sleeper();
    let second = sleeper();
    group.add(Arc::clone(&first)).unwrap();
    group.add(Arc::clone(&second)).unwrap();
    group.start().unwrap();

    group.pause().unwrap();
    group.signal(signals::SIGCONT).unwrap();
    assert_eq!(first.status(), ProcessStatus::Running);
    assert_eq!(second.status(), ProcessStatus::Running);

    group.signal(signals::SIGSTOP).unwrap();
    assert_eq!(first.status(), ProcessStatus::Paused);
    assert_eq!(second.status(), ProcessStatus::Paused);

    group.kill().unwrap();
    assert_eq!(first.status(), ProcessStatus::Finished);
    assert_eq!(second.return_code(), Some(-i64::from(signals::SIGKILL)));
}

#[test]
fn test_join_timeout_runs_out() {
    init_tracing();
    let group = ProcessGroup::new().unwrap();
    group.add(sleeper()).unwrap();
    group.start().unwrap();
    assert!(!group.join_timeout(Duration::from_millis(100)).unwrap());
    group.kill().unwrap();
    assert!(group.join_timeout(Duration::from_millis(100)).unwrap());
}
