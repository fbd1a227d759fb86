pub mod mock_backend;

pub use mock_backend::{MockBackend, MockBackendOptions};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::{BackendConfig, Config, LoggingConfig, ServerConfig};
use crate::AppState;

pub fn test_config(backend_url: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        backend: BackendConfig {
            ws_url: backend_url.to_string(),
            connect_timeout_secs: 2,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

pub fn test_state(backend_url: &str) -> Arc<AppState> {
    Arc::new(AppState::new(test_config(backend_url)))
}

/// Start a gateway on an ephemeral port. Runs until the test runtime stops.
pub async fn spawn_gateway(backend_url: &str) -> (SocketAddr, Arc<AppState>) {
    let state = test_state(backend_url);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_state = state.clone();
    tokio::spawn(async move {
        crate::serve(listener, server_state, std::future::pending()).await.unwrap();
    });

    (addr, state)
}

/// A `ws://` URL nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws", addr)
}

/// Poll `check` every 10ms until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
