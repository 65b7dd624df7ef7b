//! Deterministic replay source.
//!
//! Steps are consumed one per read. Once the script runs out the source
//! reports no signal, and optionally cancels a token when it hands out its
//! last step so a session ends right after the scripted input.

use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;

use super::{ScoreSource, SourceError};

/// One scripted read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// A score on the 0..=100 scale.
    Score(u8),
    /// No face or signal this tick.
    NoSignal,
    /// The read fails.
    Failure,
}

/// A source that replays a fixed list of steps.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    reads: usize,
    cancel_on_last: Option<CancellationToken>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
            reads: 0,
            cancel_on_last: None,
        }
    }

    /// Build a script that yields each score in order.
    pub fn from_scores(scores: &[u8]) -> Self {
        Self::new(scores.iter().copied().map(ScriptStep::Score).collect())
    }

    /// Cancel `token` as soon as the final step has been read.
    pub fn then_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel_on_last = Some(token);
        self
    }

    /// Number of reads performed so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl ScoreSource for ScriptedSource {
    fn current_score(&mut self) -> Result<Option<u8>, SourceError> {
        self.reads += 1;
        let step = self.steps.pop_front();

        if self.steps.is_empty() {
            if let Some(token) = self.cancel_on_last.take() {
                token.cancel();
            }
        }

        match step {
            Some(ScriptStep::Score(value)) => Ok(Some(value)),
            Some(ScriptStep::NoSignal) | None => Ok(None),
            Some(ScriptStep::Failure) => {
                Err(SourceError::ReadFailed("scripted failure".to_string()))
            }
        }
    }
}
