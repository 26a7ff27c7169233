use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use tracing::warn;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    store: &'a str,
    connections: usize,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            store: state.messaging.store().backend(),
            connections: state.messaging.registry().connection_count().await,
        }),
    )
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.messaging.store().backend();
    let connections = state.messaging.registry().connection_count().await;
    match state.messaging.ping().await {
        Ok(()) => {
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "ok"
            )
            .increment(1);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ready",
                    store,
                    connections,
                }),
            )
        }
        Err(err) => {
            warn!(error = %err, "readiness check failed");
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "error"
            )
            .increment(1);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    store,
                    connections,
                }),
            )
        }
    }
}

/// `/healthz` (process up) and `/readyz` (store reachable).
pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
