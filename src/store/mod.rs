//! SQLite persistence for window records and report rollups.
//!
//! A single connection sits behind a mutex; every query runs on the
//! blocking pool so async handlers never stall on disk I/O.

mod migrations;
pub mod models;
mod periods;
mod records;
mod reports;

pub use models::{DailyReport, PeriodFeedback, StudyPeriod};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("database task failed: {0}")]
    Join(String),
    #[error("database schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i32, supported: i32 },
}

/// Handle to the database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database file at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!("Failed to enable WAL mode: {}", e);
        }
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn execute<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("value {value} exceeds SQLite INTEGER range")))
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidData(format!("value {value} is negative")))
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    value
        .parse::<NaiveDate>()
        .map_err(|e| StoreError::InvalidData(format!("invalid date '{value}': {e}")))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("invalid datetime '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .execute(|conn| {
                Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(version, migrations::CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_open_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("telemetry.db");
        Database::open(&path).unwrap();
        assert!(path.exists());

        // Reopening an up-to-date database is a no-op migration.
        Database::open(&path).unwrap();
    }

    #[test]
    fn test_conversions() {
        assert!(to_i64(u64::MAX).is_err());
        assert!(to_u64(-1).is_err());
        assert_eq!(
            parse_date("2026-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
        );
        assert!(parse_datetime("yesterday").is_err());
    }
}
