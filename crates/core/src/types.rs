use chrono::SubsecRound;

/// Jobs are identified by random UUIDs.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current time truncated to microseconds.
///
/// Every timestamp written to a job goes through here so that values
/// survive a round trip through the store unchanged.
pub fn now() -> Timestamp {
    chrono::Utc::now().trunc_subsecs(6)
}

/// Allocate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4()
}
