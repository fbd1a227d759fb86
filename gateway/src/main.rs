//! LoanBot gateway - relays client WebSocket connections to the chat backend.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loanbot_gateway::{serve, AppState, Config};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("loanbot-gateway {}", VERSION);
        return Ok(());
    }

    // Load configuration
    let config = match config_path(&args) {
        Some(path) => Config::load_from(path, true),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LoanBot gateway {}", VERSION);

    let addr = config.listen_addr();
    let backend_url = config.backend.ws_url.clone();
    let state = Arc::new(AppState::new(config));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on ws://{}, relaying to {}", addr, backend_url);

    serve(listener, state, shutdown_signal()).await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Value following `--config`, if any.
fn config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
