//! focus-telemetry - windowed attention telemetry.
//!
//! The client samples a per-second attention score, folds it into
//! fixed-length windows and ships each window average to an aggregation
//! server. When a session ends the server rolls the day (and the subject's
//! study period) up and attaches generated feedback.
//!
//! # Data handling
//!
//! - **Scores only**: the client sees a 0..=100 score per second, never
//!   camera frames or landmarks
//! - **Local first**: every flushed window is kept locally even when
//!   delivery fails
//! - **Transparency**: the delivery ledger counts everything sampled,
//!   flushed and delivered
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────── client ─────────────────────────┐
//! │  ┌─────────────┐   ┌─────────────┐   ┌────────────────┐  │
//! │  │ ScoreSource │──▶│   Session   │──▶│     Window     │  │
//! │  │ (1 per tick)│   │ Controller  │   │  Accumulator   │  │
//! │  └─────────────┘   └─────────────┘   └────────────────┘  │
//! │                          │ records, summary              │
//! │                          ▼                               │
//! │                   ┌─────────────┐   ┌────────────────┐   │
//! │                   │  Delivery   │   │    Delivery    │   │
//! │                   │   Client    │   │     Ledger     │   │
//! │                   └─────────────┘   └────────────────┘   │
//! └──────────────────────────│───────────────────────────────┘
//!                            ▼ HTTP
//! ┌───────────────────────── server ─────────────────────────┐
//! │  store ──▶ ReportAggregator ──▶ FeedbackGenerator         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use focus_telemetry::{core::SessionController, delivery::DeliveryClient, source::NoopSource};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let sink = Arc::new(DeliveryClient::new(Default::default())?);
//! let mut controller = SessionController::new(1, Default::default(), NoopSource::new(), sink);
//!
//! let cancel = CancellationToken::new();
//! let outcome = controller.run(cancel).await?;
//! println!("overall average: {}", outcome.summary.overall_average);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod delivery;
pub mod feedback;
pub mod ledger;
pub mod source;

#[cfg(feature = "server")]
pub mod report;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod store;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    SessionController, SessionOutcome, SessionSettings, SessionSummary, WindowAccumulator,
    WindowRecord,
};
pub use delivery::{DeliveryClient, DeliveryConfig, DeliveryError, RecordSink};
pub use feedback::{FeedbackConfig, FeedbackGenerator};
pub use ledger::{DeliveryLedger, LedgerStats, SharedLedger};
pub use source::{ScoreSource, SourceError};

#[cfg(feature = "server")]
pub use report::{ReportAggregator, ReportOutcome};
#[cfg(feature = "server")]
pub use store::{Database, StoreError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data notice that can be displayed to users.
pub const DATA_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║               FOCUS TELEMETRY - DATA NOTICE                      ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This client reports how attentive you were while studying.      ║
║                                                                  ║
║  ✓ WHAT IS SENT:                                                 ║
║    • One average attention score per window (0-100)              ║
║    • When each window started and ended                          ║
║    • One overall average when the session ends                   ║
║                                                                  ║
║  ✗ WHAT IS NEVER SENT:                                           ║
║    • Camera frames or images of you                              ║
║    • Face landmarks or per-second scores                         ║
║    • What applications or pages you use                          ║
║                                                                  ║
║  Window results are kept locally even if delivery fails.         ║
║                                                                  ║
║  You can view delivery statistics anytime with:                  ║
║    focus-telemetry status                                        ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
