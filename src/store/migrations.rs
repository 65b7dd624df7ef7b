use super::StoreError;
use rusqlite::{Connection, Transaction};

pub(super) const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE window_records (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id       INTEGER NOT NULL,
    session_id       TEXT,
    record_date      TEXT NOT NULL,
    window_average   INTEGER NOT NULL,
    secondary_metric INTEGER NOT NULL DEFAULT 0,
    sample_count     INTEGER NOT NULL DEFAULT 0,
    start_time       TEXT NOT NULL,
    end_time         TEXT NOT NULL,
    received_at      TEXT NOT NULL
);
CREATE INDEX idx_window_records_subject_date ON window_records (subject_id, record_date);

CREATE TABLE daily_reports (
    subject_id    INTEGER NOT NULL,
    report_date   TEXT NOT NULL,
    avg_primary   REAL NOT NULL,
    avg_secondary REAL NOT NULL,
    feedback_text TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (subject_id, report_date)
);

CREATE TABLE study_periods (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id          INTEGER NOT NULL UNIQUE,
    goal                TEXT NOT NULL,
    period_start        TEXT NOT NULL,
    period_end          TEXT,
    avg_primary         REAL,
    avg_secondary       REAL,
    feedback_text       TEXT,
    feedback_updated_at TEXT
);
";

pub(super) fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        apply_migration(&tx, version)?;
        tracing::debug!("Applied schema migration {}", version);
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StoreError> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1)?,
        other => {
            return Err(StoreError::InvalidData(format!(
                "no migration for schema version {other}"
            )))
        }
    }
    Ok(())
}
