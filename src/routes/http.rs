// GET handlers: version, status, fleet, fleet insights, history, optimization, health, alerts

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::error::PersistenceError;
use crate::models::now_ms;
use crate::version::{NAME, VERSION};

const DEFAULT_HISTORY_HOURS: u32 = 24;

/// Store failures map to 500 with the error text; details go to the log.
pub(super) struct ApiError(PersistenceError);

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryParams {
    hours: Option<u32>,
    device_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WindowParams {
    hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DaysParams {
    days: Option<u32>,
}

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/status — collector breaker state plus every active device with its latest sample.
pub(super) async fn status_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.query.current_status().await?).into_response())
}

pub(super) async fn fleet_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.query.fleet_snapshot(now_ms()).await?).into_response())
}

/// GET /api/fleet/insights — fleet averages, top and problem miners, power cost, or insufficientData.
pub(super) async fn fleet_insights_handler(
    State(state): State<AppState>,
    Query(params): Query<DaysParams>,
) -> Result<Response, ApiError> {
    Ok(Json(state.query.fleet_insights(params.days, now_ms()).await?).into_response())
}

pub(super) async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let samples = state
        .query
        .history(params.device_id, params.hours.unwrap_or(DEFAULT_HISTORY_HOURS), now_ms())
        .await?;
    Ok(Json(samples).into_response())
}

/// GET /api/optimization/{device_id} — sweet-spot ranking, or insufficientData.
pub(super) async fn optimization_handler(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Query(params): Query<WindowParams>,
) -> Result<Response, ApiError> {
    let hours = params.hours.unwrap_or(state.default_window_hours);
    let report = state.query.optimization(device_id, hours, now_ms()).await?;
    Ok(Json(report).into_response())
}

pub(super) async fn health_handler(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Response, ApiError> {
    match state.query.health(device_id, now_ms()).await? {
        Some(health) => Ok(Json(health).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown device {}", device_id) })),
        )
            .into_response()),
    }
}

pub(super) async fn alerts_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.query.open_alerts().await?).into_response())
}
