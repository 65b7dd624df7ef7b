use super::{parse_date, to_i64, to_u64, DailyReport, Database, StoreError};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_report(row: &Row) -> Result<DailyReport, StoreError> {
    let subject_id: i64 = row.get("subject_id")?;
    let report_date: String = row.get("report_date")?;

    Ok(DailyReport {
        subject_id: to_u64(subject_id)?,
        report_date: parse_date(&report_date)?,
        avg_primary: row.get("avg_primary")?,
        avg_secondary: row.get("avg_secondary")?,
        feedback_text: row.get("feedback_text")?,
    })
}

impl Database {
    /// Insert or replace the report for (subject, date).
    pub async fn upsert_daily_report(&self, report: &DailyReport) -> Result<(), StoreError> {
        let report = report.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO daily_reports
                     (subject_id, report_date, avg_primary, avg_secondary, feedback_text, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (subject_id, report_date) DO UPDATE SET
                     avg_primary = excluded.avg_primary,
                     avg_secondary = excluded.avg_secondary,
                     feedback_text = excluded.feedback_text,
                     updated_at = excluded.updated_at",
                params![
                    to_i64(report.subject_id)?,
                    report.report_date.to_string(),
                    report.avg_primary,
                    report.avg_secondary,
                    report.feedback_text,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn daily_report(
        &self,
        subject_id: u64,
        date: NaiveDate,
    ) -> Result<Option<DailyReport>, StoreError> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT subject_id, report_date, avg_primary, avg_secondary, feedback_text
                 FROM daily_reports
                 WHERE subject_id = ?1 AND report_date = ?2",
            )?;
            let raw = stmt
                .query_row(params![to_i64(subject_id)?, date.to_string()], |row| {
                    Ok(row_to_report(row))
                })
                .optional()?;
            raw.transpose()
        })
        .await
    }

    /// Reports dated within `[start, end]`; an absent `end` is unbounded.
    pub async fn daily_reports_between(
        &self,
        subject_id: u64,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyReport>, StoreError> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT subject_id, report_date, avg_primary, avg_secondary, feedback_text
                 FROM daily_reports
                 WHERE subject_id = ?1
                   AND report_date >= ?2
                   AND (?3 IS NULL OR report_date <= ?3)
                 ORDER BY report_date",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        to_i64(subject_id)?,
                        start.to_string(),
                        end.map(|d| d.to_string())
                    ],
                    |row| Ok(row_to_report(row)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }
}
