/// Scheduled job document
///
/// A job is eligible for a claim when `intended` has passed, `started` is
/// unset and a handler is registered for its `name`. Claiming sets
/// `started`; the `job-ttl` index then expires the document.
///
/// Recurring jobs carry a `schedule` and exist at most once per name in the
/// pending (not started) state. One-off jobs have no schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod fields {
    pub const NAME: &str = "name";
    pub const SCHEDULE: &str = "schedule";
    pub const CREATED: &str = "created";
    pub const INTENDED: &str = "intended";
    pub const STARTED: &str = "started";
    pub const DATA: &str = "data";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "_id", default)]
    pub id: String,

    /// Handler key
    pub name: String,

    /// Recurrence expression, absent for one-off jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,

    /// Earliest moment the job may run
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub intended: DateTime<Utc>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Job {
    pub fn is_recurring(&self) -> bool {
        self.schedule.is_some()
    }
}
