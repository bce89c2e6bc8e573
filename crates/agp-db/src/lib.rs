//! Shared `sqlx::SqlitePool` setup, migrations, and WAL checkpoint helper
//! used by every persistence-owning crate in the workspace.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use agp_error::{AgpError, ErrorCode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if absent) a WAL-mode SQLite pool at `database_url`
/// (e.g. `"sqlite://agp.db"` or `"sqlite::memory:"`) and run embedded
/// migrations.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] if the connection or migrations fail.
pub async fn connect(database_url: &str) -> Result<SqlitePool, AgpError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            AgpError::new(ErrorCode::Internal, "invalid database url").with_source(e)
        })?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to open database").with_source(e))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "migration failed").with_source(e))?;

    Ok(pool)
}

/// `PRAGMA wal_checkpoint(TRUNCATE)`, run before backups.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] if the pragma fails.
pub async fn checkpoint_wal(pool: &SqlitePool) -> Result<(), AgpError> {
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
        .execute(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "wal checkpoint failed").with_source(e))?;
    Ok(())
}

/// Current epoch milliseconds, used by crates that need a millisecond
/// timestamp for TTL bookkeeping (idempotency cache) without pulling in
/// `chrono::Utc::now()` at every call site.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
