//! A source that never sees a signal.
//!
//! Useful for dry runs of the delivery path: every tick yields the neutral
//! score, so windows flush on schedule with an average of zero.

use super::{ScoreSource, SourceError};

/// A source with no sensor behind it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSource;

impl NoopSource {
    pub fn new() -> Self {
        Self
    }
}

impl ScoreSource for NoopSource {
    fn current_score(&mut self) -> Result<Option<u8>, SourceError> {
        Ok(None)
    }
}
