//! Health check handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: CheckResult,
    pub object_store: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness check: healthy whenever the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: deckforge_common::VERSION,
    })
}

/// Readiness check: the job store must answer a ping
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = std::time::Instant::now();

    let store_check = match state.processor.store().ping().await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            backend: None,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            backend: None,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    // Object storage is only reported; a presign needs no round trip
    let object_check = CheckResult {
        status: "configured".to_string(),
        backend: Some(state.processor.objects().backend_name()),
        latency_ms: None,
        error: None,
    };

    let all_healthy = store_check.status == "up";
    let code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                job_store: store_check,
                object_store: object_check,
            },
        }),
    )
}
