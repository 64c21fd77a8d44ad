//! Shared helpers for the worker integration tests
#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::mpsc;
use warden_shared::db::Db;
use warden_shared::models::job::Job;
use warden_worker::handler::JobHandler;
use warden_worker::queue::JobQueue;
use warden_worker::runner::{Runner, RunnerConfig};

/// Poll interval short enough to keep the tests fast
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound for anything the runner should do "soon"
pub const WAIT: Duration = Duration::from_secs(5);

pub fn queue() -> JobQueue {
    JobQueue::new(&Db::memory(), "jobs")
}

pub fn runner_with(queue: JobQueue, poll_interval: Duration) -> Runner {
    Runner::new(queue, RunnerConfig { poll_interval })
}

pub fn runner() -> Runner {
    runner_with(queue(), TEST_POLL_INTERVAL)
}

/// Handler forwarding every job it receives into a channel
pub fn recording() -> (impl JobHandler + 'static, mpsc::UnboundedReceiver<Job>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |job: Job| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(job);
            Ok::<_, anyhow::Error>(())
        }
    };
    (handler, rx)
}

/// Waits for the next job a recording handler saw
pub async fn next_job(rx: &mut mpsc::UnboundedReceiver<Job>) -> Job {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a job")
        .expect("handler channel closed")
}
