//! Score sources for the focus-telemetry client.
//!
//! The sensing loop (camera capture, landmark extraction, scoring) lives
//! outside this crate. A source only has to answer one question per tick:
//! what is the latest attention score, if any?

pub mod channel;
pub mod noop;
pub mod scripted;

pub use channel::{ChannelSource, LineReaderHandle};
pub use noop::NoopSource;
pub use scripted::{ScriptStep, ScriptedSource};

/// Highest score on the attention scale.
pub const MAX_SCORE: u8 = 100;

/// Score recorded for a tick where the sensor saw no face or signal.
pub const NEUTRAL_SCORE: u8 = 0;

/// Errors a source can report for a single read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The upstream sensor is gone and will not produce more scores.
    #[error("score source disconnected")]
    Disconnected,
    /// The read failed this tick but may succeed on the next one.
    #[error("score read failed: {0}")]
    ReadFailed(String),
}

/// Something that produces the latest attention score on demand.
///
/// Implementations must not block: the session controller calls this once
/// per tick and expects an immediate answer.
pub trait ScoreSource: Send {
    /// Latest score on the 0..=100 scale, `None` when there is no signal.
    fn current_score(&mut self) -> Result<Option<u8>, SourceError>;
}

impl<S: ScoreSource + ?Sized> ScoreSource for Box<S> {
    fn current_score(&mut self) -> Result<Option<u8>, SourceError> {
        (**self).current_score()
    }
}

/// Clamp an arbitrary reading onto the attention scale.
pub fn clamp_score(raw: i64) -> u8 {
    raw.clamp(0, MAX_SCORE as i64) as u8
}
