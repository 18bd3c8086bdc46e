use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;

pub const DEFAULT_HISTORY_LIMIT: i64 = 100;
pub const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct AccessLogParams {
    pub limit: Option<i64>,
}

/// `GET /access-log`: recent sessions, newest first.
pub async fn access_history(
    State(state): State<AppState>,
    Query(params): Query<AccessLogParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let rows = state.db.access_history(limit).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read access history");
        e
    })?;

    Ok(Json(rows))
}
