//! Window accumulation for per-second attention scores.
//!
//! Samples are collected into fixed-capacity windows (default 30 samples).
//! A window flushes as a unit the moment it fills: the floor mean of its
//! samples becomes a [`WindowRecord`] and the slots are cleared for the
//! next cycle. Individual scores never leave the accumulator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use uuid::Uuid;

/// One attention reading taken on a scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSample {
    /// Score on the 0..=100 scale
    pub value: u8,
    /// When the tick fired
    pub timestamp: DateTime<Utc>,
}

impl ScoreSample {
    pub fn new(value: u8, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Sample stamped with the current time.
    pub fn now(value: u8) -> Self {
        Self::new(value, Utc::now())
    }
}

/// The summary of one flushed window, as sent to the record API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Subject the scores belong to
    pub subject_id: u64,
    /// Session that produced the window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Floor mean of the samples in the window
    pub window_average: u8,
    /// Secondary metric (stress); not measured by the client yet
    #[serde(default)]
    pub secondary_metric: u8,
    /// Number of samples averaged
    #[serde(default)]
    pub sample_count: usize,
    /// Timestamp of the first sample
    pub start_time: DateTime<Utc>,
    /// Timestamp of the last sample
    pub end_time: DateTime<Utc>,
}

/// Fixed-capacity buffer that turns samples into window records.
///
/// The buffer never grows: `slots` is allocated once with the window
/// capacity and `len` tracks how many are filled.
#[derive(Debug)]
pub struct WindowAccumulator {
    subject_id: u64,
    session_id: Option<Uuid>,
    slots: Box<[u8]>,
    len: usize,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl WindowAccumulator {
    /// Create an accumulator whose windows hold `capacity` samples.
    pub fn new(subject_id: u64, capacity: NonZeroUsize) -> Self {
        Self {
            subject_id,
            session_id: None,
            slots: vec![0; capacity.get()].into_boxed_slice(),
            len: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// Tag every record produced by this accumulator with a session id.
    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Append one sample. Returns the flushed record when this sample
    /// completes the window.
    pub fn observe(&mut self, sample: ScoreSample) -> Option<WindowRecord> {
        debug_assert!(self.len < self.slots.len());

        self.slots[self.len] = sample.value;
        self.len += 1;
        if self.start_time.is_none() {
            self.start_time = Some(sample.timestamp);
        }
        self.end_time = Some(sample.timestamp);

        if self.len == self.slots.len() {
            self.flush()
        } else {
            None
        }
    }

    /// Flush whatever the window holds at shutdown.
    ///
    /// The average is taken over the samples present, not padded to the
    /// full capacity. Returns `None` for an empty window.
    pub fn flush_partial(&mut self) -> Option<WindowRecord> {
        self.flush()
    }

    /// Number of samples in the current window.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the current window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Samples per full window.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn flush(&mut self) -> Option<WindowRecord> {
        if self.len == 0 {
            return None;
        }

        let sum: u32 = self.slots[..self.len].iter().map(|&v| u32::from(v)).sum();
        let average = (sum / self.len as u32) as u8;
        let sample_count = self.len;
        let start_time = self.start_time.take();
        let end_time = self.end_time.take();
        self.len = 0;

        let (start_time, end_time) = match (start_time, end_time) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let now = Utc::now();
                (now, now)
            }
        };

        Some(WindowRecord {
            subject_id: self.subject_id,
            session_id: self.session_id,
            window_average: average,
            secondary_metric: 0,
            sample_count,
            start_time,
            end_time,
        })
    }
}

/// Floor mean of window averages, zero when there are none.
pub fn floor_mean(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    (sum / values.len() as u64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn accumulator(capacity: usize) -> WindowAccumulator {
        WindowAccumulator::new(7, NonZeroUsize::new(capacity).unwrap())
    }

    fn samples(values: &[u8]) -> Vec<ScoreSample> {
        let start = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| ScoreSample::new(v, start + Duration::seconds(i as i64)))
            .collect()
    }

    #[test]
    fn test_full_window_flushes_floor_mean() {
        let mut acc = accumulator(3);
        let input = samples(&[80, 90, 100]);

        assert!(acc.observe(input[0]).is_none());
        assert!(acc.observe(input[1]).is_none());
        let record = acc.observe(input[2]).expect("window should flush");

        assert_eq!(record.window_average, 90);
        assert_eq!(record.sample_count, 3);
        assert_eq!(record.subject_id, 7);
        assert_eq!(record.start_time, input[0].timestamp);
        assert_eq!(record.end_time, input[2].timestamp);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_average_rounds_down() {
        let mut acc = accumulator(4);
        let mut flushed = None;
        for sample in samples(&[70, 70, 70, 71]) {
            flushed = acc.observe(sample);
        }
        // 281 / 4 = 70.25
        assert_eq!(flushed.unwrap().window_average, 70);
    }

    #[test]
    fn test_exactly_one_record_per_window() {
        let mut acc = accumulator(5);
        let records: Vec<_> = samples(&[40; 12])
            .into_iter()
            .filter_map(|s| acc.observe(s))
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.capacity(), 5);
    }

    #[test]
    fn test_partial_window_averages_present_samples() {
        let mut acc = accumulator(30);
        for sample in samples(&[50, 61]) {
            assert!(acc.observe(sample).is_none());
        }

        let record = acc.flush_partial().expect("partial window should flush");
        assert_eq!(record.window_average, 55);
        assert_eq!(record.sample_count, 2);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_empty_partial_flush_produces_nothing() {
        let mut acc = accumulator(3);
        assert!(acc.flush_partial().is_none());

        for sample in samples(&[10, 20, 30]) {
            acc.observe(sample);
        }
        assert!(acc.flush_partial().is_none());
    }

    #[test]
    fn test_single_slot_window() {
        let mut acc = accumulator(1);
        let record = acc.observe(ScoreSample::now(42)).unwrap();
        assert_eq!(record.window_average, 42);
    }

    #[test]
    fn test_session_id_is_attached() {
        let id = Uuid::new_v4();
        let mut acc = accumulator(1).with_session_id(id);
        let record = acc.observe(ScoreSample::now(1)).unwrap();
        assert_eq!(record.session_id, Some(id));
    }

    #[test]
    fn test_floor_mean() {
        assert_eq!(floor_mean(&[]), 0);
        assert_eq!(floor_mean(&[90, 50]), 70);
        assert_eq!(floor_mean(&[90, 51]), 70);
    }

    #[test]
    fn test_record_wire_format() {
        let mut acc = accumulator(1);
        let record = acc.observe(ScoreSample::now(64)).unwrap();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["subject_id"], 7);
        assert_eq!(json["window_average"], 64);
        assert_eq!(json["secondary_metric"], 0);
        assert!(json.get("session_id").is_none());
        assert!(json["start_time"].is_string());
    }
}
