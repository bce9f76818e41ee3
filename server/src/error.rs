use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("userId required")]
    MissingUserId,

    #[error("blocked by time window {window} ({tz}, hour {hour})")]
    BlockedByPolicy {
        window: String,
        tz: String,
        hour: u32,
    },

    #[error("no ack from device for request {correlation_id}")]
    NoAck { correlation_id: String },

    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::MissingUserId => (
                StatusCode::BAD_REQUEST,
                json!({"ok": false, "error": "userId_required"}),
            ),
            AppError::BlockedByPolicy { window, tz, hour } => (
                StatusCode::FORBIDDEN,
                json!({
                    "ok": false,
                    "error": "blocked_by_policy",
                    "detail": {"window": window, "tz": tz, "hour": hour},
                }),
            ),
            AppError::NoAck { correlation_id } => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({"ok": false, "error": "no_ack", "correlationId": correlation_id}),
            ),
            AppError::Publish(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"ok": false, "error": "publish_failed"}),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"ok": false, "error": "db_failed"}),
            ),
        };

        (status, Json(body)).into_response()
    }
}
