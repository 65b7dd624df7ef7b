//! Session controller: the capture → window → deliver loop.
//!
//! ```text
//!   Idle ──run──▶ Running ──cancel / N read failures──▶ Draining ──▶ Terminated
//! ```
//!
//! While running, one sample is taken per tick no matter how fast the
//! sensor produces frames. Draining flushes the partial window, waits for
//! in-flight window deliveries, and sends the session summary under a hard
//! ceiling. Delivery failures are logged and never change local results.

use crate::core::window::{floor_mean, ScoreSample, WindowAccumulator, WindowRecord};
use crate::delivery::RecordSink;
use crate::ledger::{DeliveryLedger, SharedLedger};
use crate::source::{ScoreSource, NEUTRAL_SCORE};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Samples per window
    pub window_size: NonZeroUsize,
    /// Time between samples
    pub tick_interval: Duration,
    /// Consecutive read failures that end the session
    pub max_read_failures: u32,
    /// Upper bound on a single window delivery
    pub delivery_ceiling: Duration,
    /// Upper bound on the session summary delivery
    pub summary_ceiling: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            window_size: NonZeroUsize::new(30).unwrap_or(NonZeroUsize::MIN),
            tick_interval: Duration::from_secs(1),
            max_read_failures: 10,
            delivery_ceiling: Duration::from_secs(10),
            summary_ceiling: Duration::from_secs(120),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// Why a session stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired (user stop, Ctrl+C)
    Cancelled,
    /// The source failed too many times in a row
    SourceUnavailable,
}

/// End-of-session rollup, as sent to the report API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub subject_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Floor mean of all window averages; zero when no window flushed
    pub overall_average: u8,
    #[serde(default)]
    pub window_count: usize,
}

/// Everything a finished session produced locally.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub summary: SessionSummary,
    pub stop_reason: StopReason,
    /// Every flushed window, delivered or not
    pub windows: Vec<WindowRecord>,
    /// Daily feedback returned by the server, if the summary got through
    pub feedback: Option<String>,
}

/// Errors from misusing the controller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already ran (state: {0:?})")]
    AlreadyStarted(SessionState),
}

/// Drives one session for one subject.
pub struct SessionController<S, D> {
    subject_id: u64,
    session_id: Uuid,
    settings: SessionSettings,
    source: S,
    sink: Arc<D>,
    ledger: SharedLedger,
    accumulator: WindowAccumulator,
    state: SessionState,
    consecutive_failures: u32,
    averages: Vec<u8>,
    windows: Vec<WindowRecord>,
    pending: JoinSet<()>,
}

impl<S, D> SessionController<S, D>
where
    S: ScoreSource,
    D: RecordSink + 'static,
{
    pub fn new(subject_id: u64, settings: SessionSettings, source: S, sink: Arc<D>) -> Self {
        let session_id = Uuid::new_v4();
        let accumulator =
            WindowAccumulator::new(subject_id, settings.window_size).with_session_id(session_id);

        Self {
            subject_id,
            session_id,
            settings,
            source,
            sink,
            ledger: Arc::new(DeliveryLedger::new()),
            accumulator,
            state: SessionState::Idle,
            consecutive_failures: 0,
            averages: Vec::new(),
            windows: Vec::new(),
            pending: JoinSet::new(),
        }
    }

    /// Report counters into a shared ledger instead of a private one.
    pub fn with_ledger(mut self, ledger: SharedLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Window averages flushed so far, in order.
    pub fn averages(&self) -> &[u8] {
        &self.averages
    }

    /// Run until `cancel` fires or the source keeps failing, then drain.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<SessionOutcome, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted(self.state));
        }

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.transition(SessionState::Running);

        let stop_reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = ticker.tick() => {
                    if let Some(reason) = self.on_tick() {
                        break reason;
                    }
                }
                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("Window delivery task failed: {}", e);
                    }
                }
            }
        };

        tracing::info!(
            session_id = %self.session_id,
            reason = ?stop_reason,
            "Session stopping"
        );

        Ok(self.drain(stop_reason).await)
    }

    fn on_tick(&mut self) -> Option<StopReason> {
        let value = match self.source.current_score() {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.ledger.record_no_signal();
                NEUTRAL_SCORE
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.ledger.record_read_failure();
                tracing::warn!(
                    "Score read failed ({}/{}): {}",
                    self.consecutive_failures,
                    self.settings.max_read_failures,
                    e
                );
                if self.consecutive_failures >= self.settings.max_read_failures {
                    return Some(StopReason::SourceUnavailable);
                }
                return None;
            }
        };

        self.consecutive_failures = 0;
        self.ledger.record_sample();

        if let Some(record) = self.accumulator.observe(ScoreSample::now(value)) {
            self.accept(record);
        }
        None
    }

    /// Keep the record locally, then hand it to the sink in the background.
    fn accept(&mut self, record: WindowRecord) {
        tracing::info!(
            "[{}] Window flushed: average {} over {} samples",
            record.end_time.format("%H:%M:%S"),
            record.window_average,
            record.sample_count
        );

        self.averages.push(record.window_average);
        self.windows.push(record.clone());
        self.ledger.record_window_flushed();

        let sink = Arc::clone(&self.sink);
        let ledger = Arc::clone(&self.ledger);
        let ceiling = self.settings.delivery_ceiling;
        self.pending.spawn(async move {
            match tokio::time::timeout(ceiling, sink.deliver(&record)).await {
                Ok(Ok(())) => {
                    ledger.record_window_delivery(true);
                    tracing::debug!("Window record delivered");
                }
                Ok(Err(e)) => {
                    ledger.record_window_delivery(false);
                    tracing::warn!("Window delivery failed: {}", e);
                }
                Err(_) => {
                    ledger.record_window_delivery(false);
                    tracing::warn!("Window delivery abandoned after {:?}", ceiling);
                }
            }
        });
    }

    async fn drain(&mut self, stop_reason: StopReason) -> SessionOutcome {
        self.transition(SessionState::Draining);

        if let Some(record) = self.accumulator.flush_partial() {
            self.accept(record);
        }

        // Records should reach the server before the summary asks for a report.
        while let Some(joined) = self.pending.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Window delivery task failed: {}", e);
            }
        }

        let summary = SessionSummary {
            subject_id: self.subject_id,
            session_id: Some(self.session_id),
            overall_average: floor_mean(&self.averages),
            window_count: self.averages.len(),
        };

        let ceiling = self.settings.summary_ceiling;
        let feedback = match tokio::time::timeout(ceiling, self.sink.deliver_summary(&summary)).await
        {
            Ok(Ok(ack)) => {
                self.ledger.record_summary_delivery(true);
                ack.feedback
            }
            Ok(Err(e)) => {
                self.ledger.record_summary_delivery(false);
                tracing::warn!("Session summary delivery failed: {}", e);
                None
            }
            Err(_) => {
                self.ledger.record_summary_delivery(false);
                tracing::warn!("Session summary abandoned after {:?}", ceiling);
                None
            }
        };

        self.transition(SessionState::Terminated);

        SessionOutcome {
            summary,
            stop_reason,
            windows: std::mem::take(&mut self.windows),
            feedback,
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            session_id = %self.session_id,
            "Session state {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryError, SummaryAck};
    use crate::source::{ScriptStep, ScriptedSource};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSink {
        fail: bool,
        hang_summary: bool,
        records: Mutex<Vec<WindowRecord>>,
        summaries: Mutex<Vec<SessionSummary>>,
    }

    impl FakeSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RecordSink for FakeSink {
        async fn deliver(&self, record: &WindowRecord) -> Result<(), DeliveryError> {
            self.records.lock().unwrap().push(record.clone());
            if self.fail {
                return Err(DeliveryError::Network("connection refused".to_string()));
            }
            Ok(())
        }

        async fn deliver_summary(
            &self,
            summary: &SessionSummary,
        ) -> Result<SummaryAck, DeliveryError> {
            self.summaries.lock().unwrap().push(summary.clone());
            if self.hang_summary {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(DeliveryError::Timeout(Duration::from_secs(120)));
            }
            Ok(SummaryAck {
                msg: "success".to_string(),
                feedback: Some("Well done.".to_string()),
            })
        }
    }

    fn settings(window: usize) -> SessionSettings {
        SessionSettings {
            window_size: NonZeroUsize::new(window).unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_then_partial_window_scenario() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::from_scores(&[80, 90, 100, 50]).then_cancel(cancel.clone());
        let sink = Arc::new(FakeSink::default());
        let mut controller = SessionController::new(1, settings(3), source, Arc::clone(&sink));

        let outcome = controller.run(cancel).await.unwrap();

        let averages: Vec<u8> = outcome.windows.iter().map(|w| w.window_average).collect();
        assert_eq!(averages, vec![90, 50]);
        assert_eq!(outcome.summary.overall_average, 70);
        assert_eq!(outcome.summary.window_count, 2);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.feedback.as_deref(), Some("Well done."));
        assert_eq!(controller.state(), SessionState::Terminated);

        assert_eq!(sink.records.lock().unwrap().len(), 2);
        assert_eq!(sink.summaries.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_signal_counts_as_neutral_sample() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::new(vec![
            ScriptStep::Score(90),
            ScriptStep::NoSignal,
            ScriptStep::Score(60),
        ])
        .then_cancel(cancel.clone());
        let sink = Arc::new(FakeSink::default());
        let mut controller = SessionController::new(1, settings(3), source, sink);

        let outcome = controller.run(cancel).await.unwrap();
        assert_eq!(outcome.windows.len(), 1);
        assert_eq!(outcome.windows[0].window_average, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_averages_survive_delivery_failures() {
        let cancel = CancellationToken::new();
        let scores: Vec<u8> = (0..10).map(|i| 50 + i).collect();
        let source = ScriptedSource::from_scores(&scores).then_cancel(cancel.clone());
        let sink = Arc::new(FakeSink::failing());
        let ledger = Arc::new(DeliveryLedger::new());
        let mut controller = SessionController::new(4, settings(4), source, Arc::clone(&sink))
            .with_ledger(Arc::clone(&ledger));

        let outcome = controller.run(cancel).await.unwrap();

        // Two full windows plus a partial of two samples.
        assert_eq!(controller.averages().len(), 3);
        assert_eq!(outcome.windows.len(), 3);
        assert_eq!(sink.records.lock().unwrap().len(), 3);
        assert!(outcome.feedback.is_none());

        let stats = ledger.stats();
        assert_eq!(stats.windows_flushed, 3);
        assert_eq!(stats.window_delivery_failures, 3);
        assert_eq!(stats.summary_delivery_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_read_failures_terminate() {
        let steps = vec![ScriptStep::Failure; 10];
        let source = ScriptedSource::new(steps);
        let sink = Arc::new(FakeSink::default());
        let mut controller = SessionController::new(2, settings(30), source, Arc::clone(&sink));

        let outcome = controller.run(CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.stop_reason, StopReason::SourceUnavailable);
        assert!(outcome.windows.is_empty());
        assert_eq!(outcome.summary.overall_average, 0);
        // The summary is still emitted on abrupt termination.
        assert_eq!(sink.summaries.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cancel = CancellationToken::new();
        let mut steps = vec![ScriptStep::Failure; 9];
        steps.push(ScriptStep::Score(40));
        steps.extend(vec![ScriptStep::Failure; 9]);
        steps.push(ScriptStep::Score(60));
        let source = ScriptedSource::new(steps).then_cancel(cancel.clone());
        let sink = Arc::new(FakeSink::default());
        let mut controller = SessionController::new(2, settings(30), source, sink);

        let outcome = controller.run(cancel).await.unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.windows.len(), 1);
        assert_eq!(outcome.windows[0].window_average, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_summary_is_abandoned() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::from_scores(&[70]).then_cancel(cancel.clone());
        let sink = Arc::new(FakeSink {
            hang_summary: true,
            ..Default::default()
        });
        let mut controller = SessionController::new(5, settings(3), source, sink);

        let outcome = controller.run(cancel).await.unwrap();

        assert!(outcome.feedback.is_none());
        assert_eq!(outcome.summary.overall_average, 70);
        assert_eq!(controller.state(), SessionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_sample() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = Arc::new(FakeSink::default());
        let mut controller =
            SessionController::new(1, settings(3), ScriptedSource::default(), Arc::clone(&sink));

        let outcome = controller.run(cancel).await.unwrap();
        assert!(outcome.windows.is_empty());
        assert_eq!(outcome.summary.window_count, 0);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_twice_is_rejected() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = Arc::new(FakeSink::default());
        let mut controller =
            SessionController::new(1, settings(3), ScriptedSource::default(), sink);

        controller.run(cancel.clone()).await.unwrap();
        assert!(matches!(
            controller.run(cancel).await,
            Err(SessionError::AlreadyStarted(SessionState::Terminated))
        ));
    }

    #[test]
    fn test_summary_wire_format() {
        let summary = SessionSummary {
            subject_id: 9,
            session_id: None,
            overall_average: 70,
            window_count: 2,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["subject_id"], 9);
        assert_eq!(json["overall_average"], 70);
    }
}
