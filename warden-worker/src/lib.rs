///! # Warden Worker Library
///!
///! Polling job scheduler over the Warden document store.
///!
///! ## Modules
///!
///! - `schedule`: cron and plain-text recurrence expressions
///! - `queue`: job documents and the claim protocol
///! - `handler`: job handler trait and built-in handlers
///! - `runner`: handler registry and the poll loop
///! - `config`: environment configuration for the binary
///!
///! ## Example
///!
///! ```no_run
///! use warden_shared::db::Db;
///! use warden_worker::queue::JobQueue;
///! use warden_worker::runner::{Runner, RunnerConfig};
///!
///! # async fn example() {
///! let runner = Runner::new(JobQueue::new(&Db::memory(), "jobs"), RunnerConfig::default());
///! runner.start().await;
///! # }
///! ```

pub mod config;
pub mod handler;
pub mod queue;
pub mod runner;
pub mod schedule;
