use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use super::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    /// `"ready"` or `"not_ready"`.
    pub status: &'static str,
    pub ebpf_loaded: bool,
}

/// Liveness probe. Always 200 while the process runs.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness probe. 200 once the classifiers are attached, 503 before.
pub async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let loaded = state.ebpf_loaded.load(Ordering::Relaxed);
    let status = if loaded { "ready" } else { "not_ready" };
    let code = if loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadyResponse {
            status,
            ebpf_loaded: loaded,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::state::test_support::{empty_service, test_state};

    #[tokio::test]
    async fn healthz_always_returns_ok() {
        let Json(resp) = healthz(State(test_state(false, empty_service()))).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn readyz_returns_ready_when_loaded() {
        let resp = readyz(State(test_state(true, empty_service())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_returns_unavailable_when_not_loaded() {
        let resp = readyz(State(test_state(false, empty_service())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
