/// Job handlers
///
/// A handler is registered under a job name and receives every claimed job
/// of that name. Errors are logged by the runner and never retried
/// automatically; a handler that wants another attempt calls
/// [`crate::runner::Runner::reschedule`] itself.
///
/// Any `Fn(Job) -> impl Future<Output = anyhow::Result<()>>` is a handler:
///
/// ```
/// use warden_shared::models::job::Job;
/// use warden_worker::handler::JobHandler;
///
/// fn assert_handler(_: impl JobHandler) {}
///
/// assert_handler(|job: Job| async move {
///     tracing::info!(job = %job.name, "Sending digest");
///     Ok::<_, anyhow::Error>(())
/// });
/// ```

use crate::queue::JobQueue;
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use warden_shared::models::job::Job;

/// Name of the recurring job that sweeps expired jobs
pub const PURGE_EXPIRED_JOBS: &str = "purge-expired-jobs";

/// Recurrence of [`PURGE_EXPIRED_JOBS`]
pub const PURGE_SCHEDULE: &str = "every minute";

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        (self)(job).await
    }
}

/// Deletes started jobs whose TTL has passed
///
/// Stands in for the store-side expiry of the `job-ttl` index.
#[derive(Debug, Clone)]
pub struct PurgeExpiredJobs {
    queue: JobQueue,
}

impl PurgeExpiredJobs {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobHandler for PurgeExpiredJobs {
    async fn handle(&self, _job: Job) -> anyhow::Result<()> {
        let removed = self.queue.purge_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Expired jobs purged");
        }
        Ok(())
    }
}
