//! Daily and study-period rollups computed when a session ends.
//!
//! For subject S, [`ReportAggregator::run`]:
//!
//! 1. averages today's window records (falling back to the summary's
//!    overall average when none are stored),
//! 2. asks the feedback generator for a daily comment and upserts the
//!    daily report,
//! 3. when S has a study period, averages the daily reports inside it and
//!    overwrites the period feedback.
//!
//! Step 3 failing is logged and leaves the committed daily report alone.
//! Runs for the same subject are serialized; different subjects never wait
//! on each other.

mod prompt;

pub use prompt::{daily_prompt, period_prompt};

use crate::core::SessionSummary;
use crate::feedback::FeedbackGenerator;
use crate::store::{DailyReport, Database, PeriodFeedback, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What one aggregation run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub daily: DailyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<PeriodFeedback>,
}

/// Computes rollups and attaches generated feedback.
#[derive(Debug)]
pub struct ReportAggregator {
    db: Database,
    feedback: FeedbackGenerator,
    timezone: Tz,
    locks: SubjectLocks,
}

type SubjectLocks = Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>;

/// A claim on one subject's lock. The map entry is removed when the last
/// claim for that subject is released.
struct SubjectSlot<'a> {
    locks: &'a SubjectLocks,
    subject_id: u64,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SubjectSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this slot hold it: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.subject_id);
        }
    }
}

impl ReportAggregator {
    pub fn new(db: Database, feedback: FeedbackGenerator, timezone: Tz) -> Self {
        Self {
            db,
            feedback,
            timezone,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Calendar date of `at` in the report timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    /// Aggregate for today in the report timezone.
    pub async fn run(&self, summary: &SessionSummary) -> Result<ReportOutcome, StoreError> {
        let today = self.local_date(Utc::now());
        self.run_on(summary, today).await
    }

    /// Aggregate treating `today` as the current date.
    pub async fn run_on(
        &self,
        summary: &SessionSummary,
        today: NaiveDate,
    ) -> Result<ReportOutcome, StoreError> {
        let slot = self.subject_slot(summary.subject_id);
        let _guard = slot.lock.lock().await;

        let daily = self.daily_rollup(summary, today).await?;

        let period = match self.period_rollup(summary.subject_id).await {
            Ok(period) => period,
            Err(e) => {
                tracing::warn!(
                    subject_id = summary.subject_id,
                    "Study period rollup failed: {}",
                    e
                );
                None
            }
        };

        Ok(ReportOutcome { daily, period })
    }

    fn subject_slot(&self, subject_id: u64) -> SubjectSlot<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        SubjectSlot {
            locks: &self.locks,
            subject_id,
            lock: Arc::clone(locks.entry(subject_id).or_default()),
        }
    }

    async fn daily_rollup(
        &self,
        summary: &SessionSummary,
        today: NaiveDate,
    ) -> Result<DailyReport, StoreError> {
        let metrics = self.db.window_metrics_on(summary.subject_id, today).await?;

        let (avg_primary, avg_secondary) = if metrics.is_empty() {
            tracing::debug!(
                subject_id = summary.subject_id,
                "No windows stored today, using the session average"
            );
            (f64::from(summary.overall_average), 0.0)
        } else {
            let primary: Vec<f64> = metrics.iter().map(|(p, _)| f64::from(*p)).collect();
            let secondary: Vec<f64> = metrics.iter().map(|(_, s)| f64::from(*s)).collect();
            (round2(primary.mean()), round2(secondary.mean()))
        };

        let feedback_text = self
            .feedback
            .generate(&daily_prompt(avg_primary, avg_secondary))
            .await;

        let report = DailyReport {
            subject_id: summary.subject_id,
            report_date: today,
            avg_primary,
            avg_secondary,
            feedback_text,
        };
        self.db.upsert_daily_report(&report).await?;

        tracing::info!(
            subject_id = report.subject_id,
            date = %report.report_date,
            "Daily report saved (focus {}, stress {})",
            report.avg_primary,
            report.avg_secondary
        );
        Ok(report)
    }

    async fn period_rollup(&self, subject_id: u64) -> Result<Option<PeriodFeedback>, StoreError> {
        let Some(period) = self.db.active_study_period(subject_id).await? else {
            return Ok(None);
        };

        let reports = self
            .db
            .daily_reports_between(subject_id, period.period_start, period.period_end)
            .await?;

        let (avg_primary, avg_secondary) = if reports.is_empty() {
            (0.0, 0.0)
        } else {
            (
                round2(reports.iter().map(|r| r.avg_primary).mean()),
                round2(reports.iter().map(|r| r.avg_secondary).mean()),
            )
        };

        let feedback_text = self
            .feedback
            .generate(&period_prompt(&period, avg_primary, avg_secondary))
            .await;

        let feedback = PeriodFeedback {
            avg_primary,
            avg_secondary,
            feedback_text,
            updated_at: Utc::now(),
        };
        self.db.update_period_feedback(period.id, &feedback).await?;

        Ok(Some(feedback))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
