use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use super::Supervisor;
use crate::api::{health_check, ApiError};
use crate::types::ProcessStatus;

/// Status as served by the control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub status: ProcessStatus,
    pub url: String,
}

impl From<ProcessStatus> for StatusView {
    fn from(status: ProcessStatus) -> Self {
        let url = status.address.url();
        Self { status, url }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    pub notify_url: Option<String>,
    pub agent_id: Option<String>,
}

pub fn create_router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/reset", post(reset))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(supervisor)
}

async fn get_status(State(supervisor): State<Supervisor>) -> Json<StatusView> {
    Json(supervisor.status().await.into())
}

/// Answers once the replacement is ready. An empty body is a plain reset.
async fn reset(State(supervisor): State<Supervisor>, body: Bytes) -> Result<Json<StatusView>, ApiError> {
    let request: ResetRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid reset request: {}", e)))?
    };

    let status = supervisor
        .reset_and_notify(request.notify_url.as_deref(), request.agent_id.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(status.into()))
}
