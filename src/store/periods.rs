use super::{
    parse_date, parse_datetime, to_i64, to_u64, Database, PeriodFeedback, StoreError, StudyPeriod,
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_period(row: &Row) -> Result<StudyPeriod, StoreError> {
    let subject_id: i64 = row.get("subject_id")?;
    let period_start: String = row.get("period_start")?;
    let period_end: Option<String> = row.get("period_end")?;
    let feedback_text: Option<String> = row.get("feedback_text")?;
    let updated_at: Option<String> = row.get("feedback_updated_at")?;

    let feedback = match (feedback_text, updated_at) {
        (Some(feedback_text), Some(updated_at)) => Some(PeriodFeedback {
            avg_primary: row.get::<_, Option<f64>>("avg_primary")?.unwrap_or(0.0),
            avg_secondary: row.get::<_, Option<f64>>("avg_secondary")?.unwrap_or(0.0),
            feedback_text,
            updated_at: parse_datetime(&updated_at)?,
        }),
        _ => None,
    };

    Ok(StudyPeriod {
        id: row.get("id")?,
        subject_id: to_u64(subject_id)?,
        goal: row.get("goal")?,
        period_start: parse_date(&period_start)?,
        period_end: period_end.as_deref().map(parse_date).transpose()?,
        feedback,
    })
}

const PERIOD_COLUMNS: &str = "id, subject_id, goal, period_start, period_end, avg_primary, \
                              avg_secondary, feedback_text, feedback_updated_at";

impl Database {
    /// Set the subject's study period, replacing any previous one and its
    /// feedback.
    pub async fn set_study_period(
        &self,
        subject_id: u64,
        goal: String,
        period_start: NaiveDate,
        period_end: Option<NaiveDate>,
    ) -> Result<StudyPeriod, StoreError> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO study_periods (subject_id, goal, period_start, period_end)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (subject_id) DO UPDATE SET
                     goal = excluded.goal,
                     period_start = excluded.period_start,
                     period_end = excluded.period_end,
                     avg_primary = NULL,
                     avg_secondary = NULL,
                     feedback_text = NULL,
                     feedback_updated_at = NULL",
                params![
                    to_i64(subject_id)?,
                    goal,
                    period_start.to_string(),
                    period_end.map(|d| d.to_string()),
                ],
            )?;

            let sql = format!("SELECT {PERIOD_COLUMNS} FROM study_periods WHERE subject_id = ?1");
            conn.query_row(&sql, params![to_i64(subject_id)?], |row| {
                Ok(row_to_period(row))
            })?
        })
        .await
    }

    /// The subject's active study period, if one is configured.
    pub async fn active_study_period(
        &self,
        subject_id: u64,
    ) -> Result<Option<StudyPeriod>, StoreError> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {PERIOD_COLUMNS} FROM study_periods WHERE subject_id = ?1 LIMIT 1"
            );
            let raw = conn
                .query_row(&sql, params![to_i64(subject_id)?], |row| {
                    Ok(row_to_period(row))
                })
                .optional()?;
            raw.transpose()
        })
        .await
    }

    /// Overwrite the feedback attached to a study period.
    pub async fn update_period_feedback(
        &self,
        period_id: i64,
        feedback: &PeriodFeedback,
    ) -> Result<(), StoreError> {
        let feedback = feedback.clone();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE study_periods
                 SET avg_primary = ?1,
                     avg_secondary = ?2,
                     feedback_text = ?3,
                     feedback_updated_at = ?4
                 WHERE id = ?5",
                params![
                    feedback.avg_primary,
                    feedback.avg_secondary,
                    feedback.feedback_text,
                    feedback.updated_at.to_rfc3339(),
                    period_id,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::InvalidData(format!(
                    "study period {period_id} does not exist"
                )));
            }
            Ok(())
        })
        .await
    }
}
