//! SQLite-backed job store.
//!
//! Each job is one row. JSON-valued fields (`input`, `result`, `progress`,
//! `steps`) are stored as serialized text; timestamps as fixed-width
//! RFC 3339 strings so `ORDER BY created_at` and range comparisons work
//! lexically.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lpe_core::job::{Job, JobListQuery, JobStatus, NewJob, StatusCounts};
use lpe_core::types::{JobId, Timestamp};
use sqlx::FromRow;

use crate::error::StoreError;
use crate::store::{self, JobStore, TERMINAL_STATUSES};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, status, title, description, input, result, error, \
    progress, steps, retry_of, created_at, started_at, completed_at";

/// Durable [`JobStore`] over a SQLite pool.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run migrations on `pool` and wrap it.
    pub async fn connect(pool: DbPool) -> Result<Self, StoreError> {
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// A migrated store over a fresh in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = crate::create_memory_pool().await?;
        Self::connect(pool).await
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        let job = Job::new(new);
        self.save(&job).await?;
        tracing::debug!(job_id = %job.id, kind = %job.kind, "Job record created");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let row = JobRow::try_from(job)?;
        let query = format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 kind = excluded.kind, \
                 status = excluded.status, \
                 title = excluded.title, \
                 description = excluded.description, \
                 input = excluded.input, \
                 result = excluded.result, \
                 error = excluded.error, \
                 progress = excluded.progress, \
                 steps = excluded.steps, \
                 retry_of = excluded.retry_of, \
                 created_at = excluded.created_at, \
                 started_at = excluded.started_at, \
                 completed_at = excluded.completed_at"
        );
        sqlx::query(&query)
            .bind(row.id)
            .bind(row.kind)
            .bind(row.status)
            .bind(row.title)
            .bind(row.description)
            .bind(row.input)
            .bind(row.result)
            .bind(row.error)
            .bind(row.progress)
            .bind(row.steps)
            .bind(row.retry_of)
            .bind(row.created_at)
            .bind(row.started_at)
            .bind(row.completed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, params: &JobListQuery) -> Result<Vec<Job>, StoreError> {
        let limit = params.effective_limit();
        let offset = params.effective_offset();

        let rows = match params.status {
            Some(status) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM jobs WHERE status = ? \
                     ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, JobRow>(&query)
                    .bind(status.as_str())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {COLUMNS} FROM jobs \
                     ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, JobRow>(&query)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status IN (?, ?) \
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Pending.as_str())
            .bind(JobStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete_older_than(
        &self,
        age: chrono::Duration,
        terminal_only: bool,
    ) -> Result<u64, StoreError> {
        let cutoff = format_ts(&store::cutoff_for(age)?);
        let result = if terminal_only {
            sqlx::query("DELETE FROM jobs WHERE created_at < ? AND status IN (?, ?, ?)")
                .bind(cutoff)
                .bind(TERMINAL_STATUSES[0].as_str())
                .bind(TERMINAL_STATUSES[1].as_str())
                .bind(TERMINAL_STATUSES[2].as_str())
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("DELETE FROM jobs WHERE created_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let status: JobStatus = status
                .parse()
                .map_err(|e| StoreError::corrupt("<aggregate>", e))?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// A raw row from the `jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    kind: String,
    status: String,
    title: String,
    description: String,
    input: String,
    result: Option<String>,
    error: Option<String>,
    progress: Option<String>,
    steps: String,
    retry_of: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

fn format_ts(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(id: &str, raw: &str) -> Result<Timestamp, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(id, format!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(id: &str, raw: Option<&str>) -> Result<Option<Timestamp>, StoreError> {
    raw.map(|r| parse_ts(id, r)).transpose()
}

fn parse_id(id: &str, raw: &str) -> Result<JobId, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::corrupt(id, format!("bad uuid {raw:?}: {e}")))
}

impl TryFrom<&Job> for JobRow {
    type Error = StoreError;

    fn try_from(job: &Job) -> Result<Self, Self::Error> {
        Ok(Self {
            id: job.id.to_string(),
            kind: job.kind.as_str().to_string(),
            status: job.status.as_str().to_string(),
            title: job.title.clone(),
            description: job.description.clone(),
            input: serde_json::to_string(&job.input)?,
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            error: job.error.clone(),
            progress: job.progress.as_ref().map(serde_json::to_string).transpose()?,
            steps: serde_json::to_string(&job.steps)?,
            retry_of: job.retry_of.map(|id| id.to_string()),
            created_at: format_ts(&job.created_at),
            started_at: job.started_at.as_ref().map(format_ts),
            completed_at: job.completed_at.as_ref().map(format_ts),
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id_text = row.id.as_str();
        Ok(Job {
            id: parse_id(id_text, id_text)?,
            kind: row.kind.parse().map_err(|e| StoreError::corrupt(id_text, e))?,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::corrupt(id_text, e))?,
            title: row.title.clone(),
            description: row.description.clone(),
            input: serde_json::from_str(&row.input)?,
            result: row.result.as_deref().map(serde_json::from_str).transpose()?,
            error: row.error.clone(),
            progress: row
                .progress
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            steps: serde_json::from_str(&row.steps)?,
            retry_of: row
                .retry_of
                .as_deref()
                .map(|raw| parse_id(id_text, raw))
                .transpose()?,
            created_at: parse_ts(id_text, &row.created_at)?,
            started_at: parse_opt_ts(id_text, row.started_at.as_deref())?,
            completed_at: parse_opt_ts(id_text, row.completed_at.as_deref())?,
        })
    }
}
