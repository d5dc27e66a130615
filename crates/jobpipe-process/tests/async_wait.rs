//! Async waits from inside a tokio runtime

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use jobpipe_process::{Process, ProcessConfig, ProcessError, ProcessGroup, ProcessStatus};

#[tokio::test]
async fn test_wait_returns_exit_code() {
    let process = Arc::new(Process::new(ProcessConfig::new("sh").args(["-c", "exit 3"])));
    process.start().unwrap();
    assert_eq!(process.wait().await.unwrap(), 3);
}

#[tokio::test]
async fn test_wait_honours_timeout() {
    let process = Arc::new(Process::new(
        ProcessConfig::new("sleep")
            .arg("30")
            .timeout(Duration::from_millis(200)),
    ));
    process.start().unwrap();

    let result = process.wait().await;
    assert!(matches!(result, Err(ProcessError::Timeout { .. })));
    assert_eq!(process.status(), ProcessStatus::Running);
    process.kill().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_waiters() {
    let process = Arc::new(Process::new(
        ProcessConfig::new("sh").args(["-c", "sleep 0.2; exit 5"]),
    ));
    process.start().unwrap();

    let first = tokio::spawn({
        let process = Arc::clone(&process);
        async move { process.wait().await }
    });
    let second = process.wait().await.unwrap();

    assert_eq!(first.await.unwrap().unwrap(), 5);
    assert_eq!(second, 5);
}

#[tokio::test]
async fn test_group_wait() {
    let group = Arc::new(ProcessGroup::new().unwrap());
    for _ in 0..3 {
        group
            .add(Arc::new(Process::new(ProcessConfig::new("sh").args(["-c", "sleep 0.1"]))))
            .unwrap();
    }
    group.start().unwrap();
    group.wait().await.unwrap();
    assert_eq!(group.status(), ProcessStatus::Finished);
}
