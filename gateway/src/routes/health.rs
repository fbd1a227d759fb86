use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::relay::StatsSnapshot;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    relay: StatsSnapshot,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        relay: state.stats.snapshot(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    let stats = state.stats.snapshot();
    let body = format!(
        "# HELP loanbot_gateway_info Service information\n\
         # TYPE loanbot_gateway_info gauge\n\
         loanbot_gateway_info{{version=\"{}\"}} 1\n\
         # HELP loanbot_gateway_active_sessions Relay sessions currently open\n\
         # TYPE loanbot_gateway_active_sessions gauge\n\
         loanbot_gateway_active_sessions {}\n\
         # HELP loanbot_gateway_sessions_total Relay sessions accepted\n\
         # TYPE loanbot_gateway_sessions_total counter\n\
         loanbot_gateway_sessions_total {}\n\
         # HELP loanbot_gateway_upstream_failures_total Backend connections that could not be opened\n\
         # TYPE loanbot_gateway_upstream_failures_total counter\n\
         loanbot_gateway_upstream_failures_total {}\n\
         # HELP loanbot_gateway_frames_total Frames forwarded\n\
         # TYPE loanbot_gateway_frames_total counter\n\
         loanbot_gateway_frames_total{{direction=\"to_backend\"}} {}\n\
         loanbot_gateway_frames_total{{direction=\"to_client\"}} {}\n",
        version,
        stats.active_sessions,
        stats.sessions_opened,
        stats.upstream_failures,
        stats.frames_to_backend,
        stats.frames_to_client,
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
}
