//! Local delivery ledger.
//!
//! Counts what the client sampled, flushed and managed to deliver. The
//! counters are local truth: they move whether or not the remote service
//! was reachable, and they can be persisted so `status` can show totals
//! across sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One ledger counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    /// Ticks that produced a sample (including neutral samples)
    SamplesRecorded,
    /// Ticks where the source saw no signal
    NoSignalTicks,
    ReadFailures,
    /// Windows flushed locally
    WindowsFlushed,
    WindowsDelivered,
    WindowDeliveryFailures,
    SummariesDelivered,
    SummaryDeliveryFailures,
}

impl Counter {
    const ALL: [Counter; 8] = [
        Counter::SamplesRecorded,
        Counter::NoSignalTicks,
        Counter::ReadFailures,
        Counter::WindowsFlushed,
        Counter::WindowsDelivered,
        Counter::WindowDeliveryFailures,
        Counter::SummariesDelivered,
        Counter::SummaryDeliveryFailures,
    ];
}

/// Counters for the current client process.
#[derive(Debug)]
pub struct DeliveryLedger {
    counts: [AtomicU64; Counter::ALL.len()],
    /// When this ledger was created
    started_at: DateTime<Utc>,
    /// Path for persisting totals
    persist_path: Option<PathBuf>,
}

impl DeliveryLedger {
    /// Create a new in-memory ledger.
    pub fn new() -> Self {
        Self {
            counts: Default::default(),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a ledger that continues from totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut ledger = Self::new();
        ledger.persist_path = Some(path);

        if let Err(e) = ledger.load() {
            tracing::warn!("Could not load previous ledger totals: {}", e);
        }

        ledger
    }

    fn bump(&self, counter: Counter) {
        self.counts[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, counter: Counter) -> u64 {
        self.counts[counter as usize].load(Ordering::Relaxed)
    }

    pub fn record_sample(&self) {
        self.bump(Counter::SamplesRecorded);
    }

    pub fn record_no_signal(&self) {
        self.bump(Counter::NoSignalTicks);
    }

    pub fn record_read_failure(&self) {
        self.bump(Counter::ReadFailures);
    }

    pub fn record_window_flushed(&self) {
        self.bump(Counter::WindowsFlushed);
    }

    /// Record the outcome of one window delivery.
    pub fn record_window_delivery(&self, delivered: bool) {
        self.bump(if delivered {
            Counter::WindowsDelivered
        } else {
            Counter::WindowDeliveryFailures
        });
    }

    /// Record the outcome of a session summary delivery.
    pub fn record_summary_delivery(&self, delivered: bool) {
        self.bump(if delivered {
            Counter::SummariesDelivered
        } else {
            Counter::SummaryDeliveryFailures
        });
    }

    /// Current counter values.
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            samples_recorded: self.get(Counter::SamplesRecorded),
            no_signal_ticks: self.get(Counter::NoSignalTicks),
            read_failures: self.get(Counter::ReadFailures),
            windows_flushed: self.get(Counter::WindowsFlushed),
            windows_delivered: self.get(Counter::WindowsDelivered),
            window_delivery_failures: self.get(Counter::WindowDeliveryFailures),
            summaries_delivered: self.get(Counter::SummariesDelivered),
            summary_delivery_failures: self.get(Counter::SummaryDeliveryFailures),
        }
    }

    /// Seconds since this ledger was created.
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Human-readable summary for the end of a session.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples recorded: {} ({} without signal)\n\
             - Read failures: {}\n\
             - Windows flushed: {}\n\
             - Windows delivered: {} ({} failed)\n\
             - Summaries delivered: {} ({} failed)\n\
             - Duration: {} seconds",
            stats.samples_recorded,
            stats.no_signal_ticks,
            stats.read_failures,
            stats.windows_flushed,
            stats.windows_delivered,
            stats.window_delivery_failures,
            stats.summaries_delivered,
            stats.summary_delivery_failures,
            self.uptime_secs()
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedLedger {
            totals: self.stats(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedLedger =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;

        for counter in Counter::ALL {
            *self.counts[counter as usize].get_mut() = persisted.totals.get(counter);
        }
        Ok(())
    }
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of ledger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerStats {
    pub samples_recorded: u64,
    pub no_signal_ticks: u64,
    pub read_failures: u64,
    pub windows_flushed: u64,
    pub windows_delivered: u64,
    pub window_delivery_failures: u64,
    pub summaries_delivered: u64,
    pub summary_delivery_failures: u64,
}

impl LedgerStats {
    fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::SamplesRecorded => self.samples_recorded,
            Counter::NoSignalTicks => self.no_signal_ticks,
            Counter::ReadFailures => self.read_failures,
            Counter::WindowsFlushed => self.windows_flushed,
            Counter::WindowsDelivered => self.windows_delivered,
            Counter::WindowDeliveryFailures => self.window_delivery_failures,
            Counter::SummariesDelivered => self.summaries_delivered,
            Counter::SummaryDeliveryFailures => self.summary_delivery_failures,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedLedger {
    #[serde(flatten)]
    totals: LedgerStats,
    last_updated: DateTime<Utc>,
}

/// Ledger shared between the controller and delivery tasks.
pub type SharedLedger = Arc<DeliveryLedger>;

/// Create a shared ledger persisted at `path`.
pub fn create_shared_ledger_with_persistence(path: PathBuf) -> SharedLedger {
    Arc::new(DeliveryLedger::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_counting() {
        let ledger = DeliveryLedger::new();

        ledger.record_sample();
        ledger.record_sample();
        ledger.record_no_signal();
        ledger.record_window_flushed();
        ledger.record_window_delivery(true);
        ledger.record_window_delivery(false);

        let stats = ledger.stats();
        assert_eq!(stats.samples_recorded, 2);
        assert_eq!(stats.no_signal_ticks, 1);
        assert_eq!(stats.windows_flushed, 1);
        assert_eq!(stats.windows_delivered, 1);
        assert_eq!(stats.window_delivery_failures, 1);
    }

    #[test]
    fn test_persisted_totals_carry_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let first = DeliveryLedger::with_persistence(path.clone());
        first.record_window_flushed();
        first.record_summary_delivery(false);
        first.save().unwrap();

        let second = DeliveryLedger::with_persistence(path);
        second.record_window_flushed();

        let stats = second.stats();
        assert_eq!(stats.windows_flushed, 2);
        assert_eq!(stats.summary_delivery_failures, 1);
    }

    #[test]
    fn test_every_counter_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let first = DeliveryLedger::with_persistence(path.clone());
        first.record_sample();
        first.record_no_signal();
        first.record_read_failure();
        first.record_window_flushed();
        first.record_window_delivery(true);
        first.record_window_delivery(false);
        first.record_summary_delivery(true);
        first.record_summary_delivery(false);
        first.save().unwrap();

        let expected = LedgerStats {
            samples_recorded: 1,
            no_signal_ticks: 1,
            read_failures: 1,
            windows_flushed: 1,
            windows_delivered: 1,
            window_delivery_failures: 1,
            summaries_delivered: 1,
            summary_delivery_failures: 1,
        };
        assert_eq!(first.stats(), expected);
        assert_eq!(DeliveryLedger::with_persistence(path).stats(), expected);
    }

    #[test]
    fn test_older_ledger_file_loads_missing_counters_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"{"windows_flushed": 4, "last_updated": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let stats = DeliveryLedger::with_persistence(path).stats();
        assert_eq!(stats.windows_flushed, 4);
        assert_eq!(stats.samples_recorded, 0);
    }

    #[test]
    fn test_summary_format() {
        let summary = DeliveryLedger::new().summary();
        assert!(summary.contains("Windows flushed"));
        assert!(summary.contains("Summaries delivered"));
    }
}
