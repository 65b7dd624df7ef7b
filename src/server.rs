//! HTTP aggregation server.
//!
//! Receives window records and session summaries from clients, stores them
//! and runs the report aggregation when a session ends:
//!
//! - `GET  /health`
//! - `POST /record` stores one window record
//! - `POST /report/daily` runs the daily and study-period rollups
//! - `GET  /reports/:subject_id?date=YYYY-MM-DD` reads a stored daily report
//! - `PUT  /subjects/:subject_id/period` sets the subject's study period
//! - `GET  /subjects/:subject_id/period` reads it back
//!
//! # Architecture
//!
//! ```text
//! client ──→ POST /record ──────→ window_records
//!        └─→ POST /report/daily ─→ ReportAggregator ──→ daily_reports
//!                                        ↓                study_periods
//!                                 [FeedbackGenerator]
//! ```

use crate::config::Config;
use crate::core::{SessionSummary, WindowRecord};
use crate::feedback::FeedbackGenerator;
use crate::report::{ReportAggregator, ReportOutcome};
use crate::source::MAX_SCORE;
use crate::store::{DailyReport, Database, StoreError, StudyPeriod};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Timezone that defines a report's calendar date
    pub timezone: Tz,
    /// Feedback attached to reports
    pub feedback: FeedbackGenerator,
}

impl ServerConfig {
    /// Create a configuration with UTC dates and canned feedback.
    pub fn new(port: u16, database_path: PathBuf) -> Self {
        Self {
            port,
            database_path,
            timezone: chrono_tz::UTC,
            feedback: FeedbackGenerator::disabled(),
        }
    }

    /// Build from the loaded configuration file.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            port: config.server.port,
            database_path: config.server.database_path.clone(),
            timezone: config.server.report_timezone()?,
            feedback: FeedbackGenerator::from_config(&config.feedback)?,
        })
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_feedback(mut self, feedback: FeedbackGenerator) -> Self {
        self.feedback = feedback;
        self
    }
}

/// Shared server state
pub struct ServerState {
    db: Database,
    aggregator: ReportAggregator,
}

impl ServerState {
    /// Open the database and set up the aggregator.
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let db = Database::open(&config.database_path)?;
        Ok(Self::with_database(db, config))
    }

    pub fn with_database(db: Database, config: &ServerConfig) -> Self {
        Self {
            aggregator: ReportAggregator::new(db.clone(), config.feedback.clone(), config.timezone),
            db,
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from the record endpoint
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub msg: String,
    pub id: i64,
    pub record_date: NaiveDate,
}

/// Response from the daily report endpoint
#[derive(Debug, Serialize)]
pub struct DailyReportResponse {
    pub msg: String,
    pub feedback: String,
    pub report: ReportOutcome,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub date: Option<NaiveDate>,
}

/// Body of `PUT /subjects/:subject_id/period`
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodRequest {
    pub goal: String,
    pub period_start: NaiveDate,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn store_failure(e: StoreError) -> ApiError {
    tracing::error!("Database operation failed: {}", e);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "STORE_ERROR",
        format!("Database operation failed: {}", e),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /record
///
/// Stores one window record under the calendar date its window started on.
async fn record(
    State(state): State<Arc<ServerState>>,
    Json(record): Json<WindowRecord>,
) -> Result<Json<RecordResponse>, ApiError> {
    if record.window_average > MAX_SCORE || record.secondary_metric > MAX_SCORE {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_RECORD",
            format!("Scores must be within 0..={}", MAX_SCORE),
        ));
    }
    if record.end_time < record.start_time {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_RECORD",
            "Window ends before it starts",
        ));
    }

    let record_date = state.aggregator.local_date(record.start_time);
    let id = state
        .db
        .insert_window_record(&record, record_date)
        .await
        .map_err(store_failure)?;

    tracing::debug!(
        subject_id = record.subject_id,
        average = record.window_average,
        "Window record saved"
    );

    Ok(Json(RecordResponse {
        msg: "saved".to_string(),
        id,
        record_date,
    }))
}

/// POST /report/daily
///
/// Runs the aggregation for the subject of a finished session.
async fn report_daily(
    State(state): State<Arc<ServerState>>,
    Json(summary): Json<SessionSummary>,
) -> Result<Json<DailyReportResponse>, ApiError> {
    if summary.overall_average > MAX_SCORE {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_SUMMARY",
            format!("Overall average must be within 0..={}", MAX_SCORE),
        ));
    }

    tracing::info!(
        subject_id = summary.subject_id,
        windows = summary.window_count,
        "Session summary received"
    );

    let outcome = state.aggregator.run(&summary).await.map_err(store_failure)?;

    Ok(Json(DailyReportResponse {
        msg: "success".to_string(),
        feedback: outcome.daily.feedback_text.clone(),
        report: outcome,
    }))
}

/// GET /reports/:subject_id
async fn get_report(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<u64>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let date = query
        .date
        .unwrap_or_else(|| state.aggregator.local_date(Utc::now()));

    state
        .db
        .daily_report(subject_id, date)
        .await
        .map_err(store_failure)?
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "REPORT_NOT_FOUND",
                format!("No report for subject {} on {}", subject_id, date),
            )
        })
}

/// PUT /subjects/:subject_id/period
async fn put_period(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<u64>,
    Json(request): Json<PeriodRequest>,
) -> Result<Json<StudyPeriod>, ApiError> {
    let goal = request.goal.trim();
    if goal.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_PERIOD",
            "Goal must not be empty",
        ));
    }
    if matches!(request.period_end, Some(end) if end < request.period_start) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_PERIOD",
            "Period ends before it starts",
        ));
    }

    let period = state
        .db
        .set_study_period(
            subject_id,
            goal.to_string(),
            request.period_start,
            request.period_end,
        )
        .await
        .map_err(store_failure)?;

    tracing::info!(subject_id, goal = %period.goal, "Study period set");
    Ok(Json(period))
}

/// GET /subjects/:subject_id/period
async fn get_period(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<u64>,
) -> Result<Json<StudyPeriod>, ApiError> {
    state
        .db
        .active_study_period(subject_id)
        .await
        .map_err(store_failure)?
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "PERIOD_NOT_FOUND",
                format!("Subject {} has no study period", subject_id),
            )
        })
}

/// Build the router over an existing state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/record", post(record))
        .route("/report/daily", post(report_daily))
        .route("/reports/:subject_id", get(get_report))
        .route("/subjects/:subject_id/period", get(get_period).put(put_period))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Aggregation server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
