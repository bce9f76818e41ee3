use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::AppError,
    gate::{self, OpenOutcome},
    reports::{self, AreaReport},
    state::AppState,
    store::GateRequestLog,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub pulse_ms: Option<Value>,
}

pub async fn open_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OpenRequest>,
) -> Result<Json<OpenOutcome>, AppError> {
    let user_id = payload.user_id.unwrap_or_default();
    let outcome = gate::open(&state, &user_id, payload.pulse_ms.as_ref()).await?;

    Ok(Json(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<GateRequestLog>>, AppError> {
    let device_id = query
        .device_id
        .unwrap_or_else(|| state.config.device_id.clone());
    let logs = state
        .store
        .recent_logs(&device_id, query.limit.unwrap_or(50))
        .await?;

    Ok(Json(logs))
}

pub async fn stale_evolutions_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AreaReport>>, AppError> {
    Ok(Json(reports::stale_evolutions(&state.store).await?))
}
