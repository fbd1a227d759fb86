pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod routes;
pub mod test_util;

pub use config::{BackendConfig, Config, LoggingConfig, ServerConfig};
pub use error::RelayError;
pub use relay::{ws_handler, RelayStats, StatsSnapshot};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
///
/// Nothing in here belongs to a single client: each relay session owns its
/// two connections and only bumps the process-wide counters.
pub struct AppState {
    pub config: Config,
    pub stats: Arc<RelayStats>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stats: Arc::new(RelayStats::new()),
        }
    }
}

/// Build the gateway router: the relay endpoint plus health routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .merge(routes::health::router())
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accept clients on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
