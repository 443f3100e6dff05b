//! Durable job storage.
//!
//! [`JobStore`](store::JobStore) is the storage seam used by the job
//! manager. [`SqliteJobStore`](sqlite::SqliteJobStore) is the durable
//! implementation; [`MemoryJobStore`](memory::MemoryJobStore) keeps
//! everything in process.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use store::JobStore;

pub type DbPool = sqlx::SqlitePool;

/// Create a connection pool from a database URL such as
/// `sqlite://lpe-jobs.db?mode=rwc`.
pub async fn create_pool(database_url: &str) -> Result<DbPool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create a pool over a private in-memory database.
///
/// Pinned to a single connection that never expires; a second connection
/// would see a different, empty database.
pub async fn create_memory_pool() -> Result<DbPool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Apply all pending schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
