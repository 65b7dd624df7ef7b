//! Persisted rollup types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One subject's rollup for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub subject_id: u64,
    pub report_date: NaiveDate,
    /// Mean window average (focus), two decimals
    pub avg_primary: f64,
    /// Mean secondary metric (stress), two decimals
    pub avg_secondary: f64,
    pub feedback_text: String,
}

/// Feedback attached to a study period, overwritten on every session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodFeedback {
    pub avg_primary: f64,
    pub avg_secondary: f64,
    pub feedback_text: String,
    pub updated_at: DateTime<Utc>,
}

/// A subject's active preparation period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyPeriod {
    pub id: i64,
    pub subject_id: u64,
    /// What the subject is preparing for
    pub goal: String,
    pub period_start: NaiveDate,
    /// Open-ended when unset
    pub period_end: Option<NaiveDate>,
    pub feedback: Option<PeriodFeedback>,
}

impl StudyPeriod {
    /// Last date covered by the period; open-ended periods run to the end
    /// of the calendar.
    pub fn effective_end(&self) -> NaiveDate {
        self.period_end.unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.period_start && date <= self.effective_end()
    }
}
