/// Polling job runner
///
/// The runner owns a handler map and a poll loop on a Tokio task:
///
/// ```text
/// Idle --start()--> Active --stop()--> Stopping --loop exits--> Idle
/// ```
///
/// Each iteration claims at most one job through [`JobQueue::take_job`] and
/// awaits its handler before polling again. With no handlers registered, or
/// nothing due, the loop sleeps for the poll interval. Handler errors and
/// panics are logged with a `[cron]` prefix and the loop carries on.
///
/// `stop()` is cooperative: the running handler always completes, a sleeping
/// loop is woken, and `stop()` returns once the loop has exited.
///
/// # Example
///
/// ```no_run
/// use warden_shared::db::Db;
/// use warden_shared::models::job::Job;
/// use warden_worker::queue::JobQueue;
/// use warden_worker::runner::{Runner, RunnerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runner = Runner::new(JobQueue::new(&Db::memory(), "jobs"), RunnerConfig::default());
///
/// runner.handle("digest", |job: Job| async move {
///     tracing::info!(job_id = %job.id, "Sending digest");
///     Ok::<_, anyhow::Error>(())
/// })?;
/// runner.schedule("every day at 07:00", "digest", None).await?;
///
/// runner.start().await;
/// tokio::signal::ctrl_c().await?;
/// runner.stop().await;
/// # Ok(())
/// # }
/// ```

use crate::handler::JobHandler;
use crate::queue::{JobQueue, QueueError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warden_shared::models::job::Job;

/// Default pause between polls when nothing is due
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Runner error
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("There is already a handler for {0}")]
    DuplicateHandler(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Idle,
    Active,
    Stopping,
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Sleep between polls when there is nothing to do
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

struct Shared {
    queue: JobQueue,
    config: RunnerConfig,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    status: Mutex<RunnerStatus>,
}

/// Handle on the poll loop that is currently running
struct Control {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Job runner
pub struct Runner {
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Option<Control>>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("status", &self.status())
            .field("names", &self.shared.names())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set_status(&self, status: RunnerStatus) {
        *lock(&self.status) = status;
    }

    async fn pause(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            let names = self.names();
            if names.is_empty() {
                self.pause(&shutdown).await;
                continue;
            }

            match self.queue.take_job(&names).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => self.pause(&shutdown).await,
                Err(err) => {
                    tracing::error!(error = %err, "[cron]: failed to take a job");
                    self.pause(&shutdown).await;
                }
            }
        }

        self.set_status(RunnerStatus::Idle);
    }

    async fn process(&self, job: Job) {
        let name = job.name.clone();
        let Some(handler) = self.handler(&name) else {
            tracing::error!(job = %name, "[cron]: There is no handler registered for {}", name);
            return;
        };

        tracing::info!(job = %name, job_id = %job.id, "Running job");

        // A spawned task turns a panicking handler into a JoinError
        match tokio::spawn(async move { handler.handle(job).await }).await {
            Ok(Ok(())) => tracing::debug!(job = %name, "Job finished"),
            Ok(Err(err)) => tracing::error!(job = %name, "[cron]: {}", err),
            Err(err) => tracing::error!(job = %name, "[cron]: handler panicked: {}", err),
        }
    }
}

impl Runner {
    pub fn new(queue: JobQueue, config: RunnerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                config,
                handlers: RwLock::new(HashMap::new()),
                status: Mutex::new(RunnerStatus::Idle),
            }),
            control: tokio::sync::Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.shared.queue
    }

    pub fn status(&self) -> RunnerStatus {
        *lock(&self.shared.status)
    }

    /// Names with a registered handler
    pub fn names(&self) -> Vec<String> {
        self.shared.names()
    }

    /// Registers the handler for `name`; every name takes one handler
    pub fn handle(&self, name: impl Into<String>, handler: impl JobHandler + 'static) -> Result<(), RunnerError> {
        let name = name.into();
        let mut handlers = self.shared.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&name) {
            return Err(RunnerError::DuplicateHandler(name));
        }

        tracing::info!(job = %name, "Registering job handler");
        handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Starts the poll loop; does nothing unless idle
    pub async fn start(&self) {
        let mut control = self.control.lock().await;
        if self.status() != RunnerStatus::Idle {
            return;
        }

        self.shared.set_status(RunnerStatus::Active);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.shared.clone().run(shutdown.clone()));
        *control = Some(Control { shutdown, task });

        tracing::info!(names = ?self.names(), "Job runner started");
    }

    /// Stops the poll loop and waits for it to exit
    ///
    /// A sleeping loop wakes immediately; a running handler finishes first.
    /// The store handle is shared with the caller and stays open: whoever
    /// opened the [`Db`](warden_shared::db::Db) closes it after `stop` returns,
    /// as the worker binary does.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if let Some(Control { shutdown, task }) = control.take() {
            self.shared.set_status(RunnerStatus::Stopping);
            shutdown.cancel();

            if let Err(err) = task.await {
                tracing::error!(error = %err, "Job runner loop ended abnormally");
            }
            tracing::info!("Job runner stopped");
        }

        self.shared.set_status(RunnerStatus::Idle);
    }

    /// See [`JobQueue::schedule`]
    pub async fn schedule(&self, schedule: &str, name: &str, data: Option<Value>) -> Result<Job, RunnerError> {
        Ok(self.shared.queue.schedule(schedule, name, data).await?)
    }

    /// Registers `handler` for `name` and schedules it
    pub async fn schedule_with(
        &self,
        schedule: &str,
        name: &str,
        handler: impl JobHandler + 'static,
    ) -> Result<Job, RunnerError> {
        self.handle(name, handler)?;
        self.schedule(schedule, name, None).await
    }

    /// Claims one due job for the registered names without running it
    pub async fn take_job(&self) -> Result<Option<Job>, RunnerError> {
        Ok(self.shared.queue.take_job(&self.names()).await?)
    }

    /// See [`JobQueue::reschedule`]
    pub async fn reschedule(&self, job: &Job) -> Result<Job, RunnerError> {
        Ok(self.shared.queue.reschedule(job).await?)
    }

    /// Deletes all jobs of the registered names
    pub async fn reset(&self) -> Result<u64, RunnerError> {
        Ok(self.shared.queue.reset(&self.names()).await?)
    }
}
