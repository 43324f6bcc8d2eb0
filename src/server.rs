use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::analysis::{
    AnalysisError, AnalysisErrorKind, AnalysisRecord, AnalysisResponse, Orchestrator,
    RawAnalysisRequest,
    error::{internal_error, invalid_input},
    ports::HistoryPort,
};

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    history: Arc<dyn HistoryPort>,
    service_name: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, service_name: impl Into<String>) -> Self {
        let history = orchestrator.history();
        Self {
            orchestrator,
            history,
            service_name: service_name.into(),
        }
    }
}

/// JSON error body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError(AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: AnalysisErrorKind) -> StatusCode {
    match kind {
        AnalysisErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        AnalysisErrorKind::ContentRejected => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisErrorKind::MalformedReasoningOutput => StatusCode::BAD_GATEWAY,
        AnalysisErrorKind::ReasoningUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisErrorKind::NotFound => StatusCode::NOT_FOUND,
        // Client closed request; nobody reads it but access logs.
        AnalysisErrorKind::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        if status.is_server_error() {
            tracing::warn!(
                target: "server",
                kind = self.0.kind.as_str(),
                status = status.as_u16(),
                error = %self.0.message,
                "request_failed"
            );
        }
        let body = ErrorBody {
            error: self.0.message,
            retryable: self.0.retryable,
            analysis_id: self.0.analysis_id,
        };
        (status, Json(body)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/history", get(list_history))
        .route("/api/history/{id}", get(get_history))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` fires, then drains in-flight requests.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let local_addr: SocketAddr = listener
        .local_addr()
        .context("failed to read listener address")?;
    tracing::info!(target: "server", addr = %local_addr, "server_listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server terminated unexpectedly")
}

async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RawAnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let Json(raw) = body.map_err(|rejection| invalid_input(rejection.body_text()))?;
    let caller_id = headers
        .get(CALLER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let raw = raw.with_caller_id(caller_id);

    // The run lives in its own task so a dropped connection cannot abort
    // persistence; the guard turns the drop into a cancellation signal.
    let cancel = CancellationToken::new();
    let disconnect_guard = cancel.clone().drop_guard();
    let orchestrator = Arc::clone(&state.orchestrator);
    let task = tokio::spawn(async move { orchestrator.analyze(raw, cancel).await });

    let joined = task.await;
    disconnect_guard.disarm();
    let response = joined
        .map_err(|err| internal_error(format!("analysis task failed: {err}")))??;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AnalysisRecord>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let records = state.history.recent(limit).await?;
    Ok(Json(records))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisRecord>, ApiError> {
    let record = state.history.get(&id).await?;
    Ok(Json(record))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(HealthBody {
        status: "healthy".to_string(),
        service: state.service_name.clone(),
        timestamp,
    })
}
