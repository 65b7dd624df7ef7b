//! Core client pipeline for focus-telemetry.
//!
//! This module contains:
//! - Window accumulation of per-second scores into fixed-size windows
//! - The session controller that samples, flushes and drains

pub mod session;
pub mod window;

// Re-export commonly used types
pub use session::{
    SessionController, SessionError, SessionOutcome, SessionSettings, SessionState,
    SessionSummary, StopReason,
};
pub use window::{floor_mean, ScoreSample, WindowAccumulator, WindowRecord};
