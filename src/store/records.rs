use super::{to_i64, Database, StoreError};
use crate::core::WindowRecord;
use chrono::{NaiveDate, Utc};
use rusqlite::params;

impl Database {
    /// Persist one window record under the calendar date it belongs to.
    pub async fn insert_window_record(
        &self,
        record: &WindowRecord,
        record_date: NaiveDate,
    ) -> Result<i64, StoreError> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO window_records
                     (subject_id, session_id, record_date, window_average, secondary_metric,
                      sample_count, start_time, end_time, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    to_i64(record.subject_id)?,
                    record.session_id.map(|id| id.to_string()),
                    record_date.to_string(),
                    record.window_average,
                    record.secondary_metric,
                    to_i64(record.sample_count as u64)?,
                    record.start_time.to_rfc3339(),
                    record.end_time.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Primary and secondary metrics of every window a subject recorded on
    /// `date`.
    pub async fn window_metrics_on(
        &self,
        subject_id: u64,
        date: NaiveDate,
    ) -> Result<Vec<(u8, u8)>, StoreError> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT window_average, secondary_metric
                 FROM window_records
                 WHERE subject_id = ?1 AND record_date = ?2
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![to_i64(subject_id)?, date.to_string()], |row| {
                    Ok((row.get::<_, u8>(0)?, row.get::<_, u8>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Number of window records stored for a subject.
    pub async fn count_window_records(&self, subject_id: u64) -> Result<u64, StoreError> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM window_records WHERE subject_id = ?1",
                params![to_i64(subject_id)?],
                |row| row.get(0),
            )?;
            super::to_u64(count)
        })
        .await
    }
}
