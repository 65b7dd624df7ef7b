//! Prompt text for feedback requests.

use crate::store::StudyPeriod;

pub fn daily_prompt(avg_primary: f64, avg_secondary: f64) -> String {
    format!(
        "Average focus {avg_primary}, stress {avg_secondary}. Encouragement within 50 characters."
    )
}

pub fn period_prompt(period: &StudyPeriod, avg_primary: f64, avg_secondary: f64) -> String {
    let end = period
        .period_end
        .map(|d| d.to_string())
        .unwrap_or_else(|| "open-ended".to_string());
    format!(
        "Preparing for {} ({} to {}). Cumulative focus {avg_primary}, stress {avg_secondary}. \
         Encouragement within 80 characters.",
        period.goal, period.period_start, end
    )
}
