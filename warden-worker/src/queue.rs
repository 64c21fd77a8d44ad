/// Job queue
///
/// Jobs are documents in a store collection (see
/// [`warden_shared::models::job::Job`]). Several workers may poll the same
/// collection.
///
/// # Claim protocol
///
/// [`JobQueue::take_job`] runs in one store session:
///
/// 1. find a due job (`intended <= now`, `started` unset, name registered)
///    and set `started` in the same conditional update
/// 2. for a recurring job, insert its successor at the next occurrence
///
/// If the successor cannot be computed or inserted the session rolls back
/// and the job stays claimable. A job is handed to at most one worker.
/// Started jobs are left for the `job-ttl` index to expire.
///
/// # Example
///
/// ```no_run
/// use warden_shared::db::Db;
/// use warden_worker::queue::JobQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = JobQueue::new(&Db::memory(), "jobs");
/// queue.ensure_indexes().await?;
///
/// queue.schedule("*/5 * * * *", "digest", None).await?;
/// if let Some(job) = queue.take_job(&["digest".to_string()]).await? {
///     println!("Claimed {}", job.id);
/// }
/// # Ok(())
/// # }
/// ```

use crate::schedule::{is_once, Schedule, ScheduleError};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::time::Duration as StdDuration;
use thiserror::Error;
use warden_shared::db::query::{Filter, IndexSpec, Update};
use warden_shared::db::{Collection, Db, StoreError};
use warden_shared::id::IdGenerator;
use warden_shared::models::job::{fields, Job};

/// Name of the index that expires started jobs
pub const JOB_TTL_INDEX: &str = "job-ttl";

/// How long a started job is kept
pub const DEFAULT_JOB_TTL_SECONDS: u64 = 300;

/// Delay before a rescheduled one-off job runs again
pub const RETRY_DELAY_SECONDS: i64 = 300;

pub const JOB_ID_PREFIX: &str = "job_";

/// Job queue error
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl From<QueueError> for warden_shared::error::Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Store(err) => err.into(),
            QueueError::Schedule(err) => Self::user_input(err.to_string()),
        }
    }
}

/// Job queue over one collection
#[derive(Debug, Clone)]
pub struct JobQueue {
    jobs: Collection<Job>,
    ttl: StdDuration,
}

impl JobQueue {
    pub fn new(db: &Db, collection: impl Into<String>) -> Self {
        Self {
            jobs: db.collection(collection, IdGenerator::with_prefix(JOB_ID_PREFIX)),
            ttl: StdDuration::from_secs(DEFAULT_JOB_TTL_SECONDS),
        }
    }

    /// Sets how long started jobs are kept
    pub fn with_ttl(mut self, ttl: StdDuration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn jobs(&self) -> &Collection<Job> {
        &self.jobs
    }

    pub fn db(&self) -> &Db {
        self.jobs.db()
    }

    /// Creates the TTL index on `started`
    pub async fn ensure_indexes(&self) -> Result<(), QueueError> {
        self.jobs
            .create_index(&IndexSpec::new(JOB_TTL_INDEX, fields::STARTED).expire_after(self.ttl))
            .await?;
        Ok(())
    }

    /// Schedules `name` to run once now, or on a recurrence
    ///
    /// `schedule` is either `"once"` or a recurrence expression. A recurring
    /// job is upserted by name, so scheduling the same name again changes its
    /// cadence in place. One-off jobs are always inserted.
    pub async fn schedule(&self, schedule: &str, name: &str, data: Option<Value>) -> Result<Job, QueueError> {
        self.schedule_at(schedule, name, data, Utc::now()).await
    }

    pub async fn schedule_at(
        &self,
        schedule: &str,
        name: &str,
        data: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        if is_once(schedule) {
            return self.insert_at(name, data, now, now).await;
        }

        let schedule = Schedule::parse(schedule)?;
        let intended = schedule.next_after(now)?;

        let filter = Filter::eq(fields::NAME, name).and(Filter::missing(fields::STARTED));
        let mut update = Update::new()
            .set(fields::SCHEDULE, schedule.source())
            .set(fields::CREATED, now.timestamp_millis())
            .set(fields::INTENDED, intended.timestamp_millis());
        update = match data {
            Some(data) => update.set(fields::DATA, data),
            None => update.unset(fields::DATA),
        };

        let job = self.jobs.upsert(&filter, &update).await?;
        tracing::info!(job = %name, schedule = %schedule.source(), intended = %intended, "Recurring job scheduled");
        Ok(job)
    }

    async fn insert_at(
        &self,
        name: &str,
        data: Option<Value>,
        now: DateTime<Utc>,
        intended: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        let job = self
            .jobs
            .insert_one(Job {
                id: String::new(),
                name: name.to_string(),
                schedule: None,
                created: now,
                intended,
                started: None,
                data,
            })
            .await?;

        tracing::info!(job = %name, job_id = %job.id, intended = %intended, "One-off job scheduled");
        Ok(job)
    }

    /// Claims one due job whose name is in `names`
    pub async fn take_job(&self, names: &[String]) -> Result<Option<Job>, QueueError> {
        self.take_job_at(names, Utc::now()).await
    }

    pub async fn take_job_at(&self, names: &[String], now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        if names.is_empty() {
            return Ok(None);
        }

        let filter = Filter::And(vec![
            Filter::lte(fields::INTENDED, now.timestamp_millis()),
            Filter::missing(fields::STARTED),
            Filter::is_in(fields::NAME, names.iter().cloned()),
        ]);
        let claim = Update::new().set(fields::STARTED, now.timestamp_millis());

        let mut session = self.jobs.db().begin().await?;
        let mut jobs = self.jobs.in_session(session.as_mut());

        let Some(job) = jobs.find_one_and_update(&filter, &claim).await? else {
            return Ok(None);
        };

        if let Some(schedule) = &job.schedule {
            let intended = Schedule::parse(schedule)?.next_after(now)?;
            jobs.insert_one(Job {
                id: String::new(),
                name: job.name.clone(),
                schedule: Some(schedule.clone()),
                created: now,
                intended,
                started: None,
                data: job.data.clone(),
            })
            .await?;
        }

        session.commit().await?;

        tracing::debug!(job = %job.name, job_id = %job.id, "Job claimed");
        Ok(Some(job))
    }

    /// Queues another run of `job`
    ///
    /// A one-off job runs again [`RETRY_DELAY_SECONDS`] from now. A
    /// recurring job is upserted at its next occurrence.
    pub async fn reschedule(&self, job: &Job) -> Result<Job, QueueError> {
        self.reschedule_at(job, Utc::now()).await
    }

    pub async fn reschedule_at(&self, job: &Job, now: DateTime<Utc>) -> Result<Job, QueueError> {
        match &job.schedule {
            Some(schedule) => self.schedule_at(schedule, &job.name, job.data.clone(), now).await,
            None => {
                let intended = now + Duration::seconds(RETRY_DELAY_SECONDS);
                self.insert_at(&job.name, job.data.clone(), now, intended).await
            }
        }
    }

    /// Deletes every job named in `names`
    pub async fn reset(&self, names: &[String]) -> Result<u64, QueueError> {
        if names.is_empty() {
            return Ok(0);
        }

        let deleted = self
            .jobs
            .delete_many(&Filter::is_in(fields::NAME, names.iter().cloned()))
            .await?;
        Ok(deleted)
    }

    /// Removes started jobs older than the TTL
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        Ok(self.jobs.purge_expired(now).await?)
    }
}
