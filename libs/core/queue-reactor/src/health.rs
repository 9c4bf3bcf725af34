//! HTTP endpoints for a process hosting reactors.
//!
//! | route                 | answers                                              |
//! |-----------------------|------------------------------------------------------|
//! | `/health`, `/healthz` | process is up                                        |
//! | `/ready`, `/readyz`   | 200 once every reactor listens, 503 with statuses otherwise |
//! | `/reactors`           | per-reactor status                                   |
//! | `/metrics`            | Prometheus text, 503 until [`init_metrics`](crate::init_metrics) ran |

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::host::ReactorHost;
use crate::metrics;
use crate::reactor::ReactorStatus;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// State shared by the endpoint handlers.
#[derive(Clone)]
pub struct HealthState {
    pub host: Arc<ReactorHost>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        host: Arc<ReactorHost>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            host,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Liveness body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Readiness body: overall verdict plus the status of every reactor.
#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub reactors: Vec<ReactorStatus>,
}

impl ReadinessReport {
    fn of(host: &ReactorHost) -> (StatusCode, Self) {
        let (code, status) = if host.is_ready() {
            (StatusCode::OK, "ready")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
        };
        (
            code,
            Self {
                status,
                reactors: host.statuses(),
            },
        )
    }
}

async fn liveness(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Reactors in backoff, stopped, or still starting keep the process unready.
async fn readiness(State(state): State<HealthState>) -> Response {
    let (code, report) = ReadinessReport::of(&state.host);
    (code, Json(report)).into_response()
}

async fn reactor_statuses(State(state): State<HealthState>) -> Json<Vec<ReactorStatus>> {
    Json(state.host.statuses())
}

async fn prometheus() -> Response {
    let (code, body) = match metrics::prometheus_handle() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    };
    (code, [(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
}

/// Router serving the endpoints listed in the module docs.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/healthz", get(liveness))
        .route("/ready", get(readiness))
        .route("/readyz", get(readiness))
        .route("/reactors", get(reactor_statuses))
        .route("/metrics", get(prometheus))
        .with_state(state)
}
