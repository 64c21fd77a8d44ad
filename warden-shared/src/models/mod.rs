/// Document models
///
/// # Models
///
/// - `user`: user accounts, credentials and sessions
/// - `job`: scheduled jobs consumed by the worker

pub mod job;
pub mod user;
