//! LoanBot client - line-based terminal chat over the gateway.
//!
//! Every line typed is sent as a text frame. `/restart` reconnects from
//! scratch (the only way out of the error state), `/quit` exits.

use std::env;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loanbot_client::{ClientError, Config, ConnectionStatus, ReconnectionManager, ReconnectionState, WsConnector};
use loanbot_common::BotMessage;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("loanbot-client {}", VERSION);
        return Ok(());
    }

    // Load configuration
    let config = match config_path(&args) {
        Some(path) => Config::load_from(path, true),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load configuration: {}", e))?;

    // Initialize tracing. Logs go to stderr so they don't mix with the chat.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let connector = Arc::new(WsConnector::new(config.gateway.ws_url.clone()));
    let mut manager = ReconnectionManager::start(connector, config.reconnect);
    println!("LoanBot client {} - connecting to {}", VERSION, config.gateway.ws_url);
    println!("Type a message and press enter. /restart reconnects, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut states = manager.subscribe_state();
    let mut messages = manager.subscribe_messages();
    let mut errors = manager.subscribe_errors();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/restart" => manager.restart().await,
                    text => {
                        if let Err(e) = manager.send(text) {
                            println!("! {}", e);
                        }
                    }
                }
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                print_state(&state);
            }
            Ok(()) = messages.changed() => {
                if let Some(message) = messages.borrow_and_update().clone() {
                    print_message(&message);
                }
            }
            Ok(()) = errors.changed() => {
                // Refused sends are already reported inline.
                if let Some(e) = errors.borrow_and_update().clone() {
                    if !matches!(e, ClientError::NotConnected(_)) {
                        println!("! {}", e);
                    }
                }
            }
        }
    }

    manager.shutdown().await;
    println!("Bye.");
    Ok(())
}

fn print_state(state: &ReconnectionState) {
    match state.status {
        ConnectionStatus::Disconnected if state.attempt_count > 0 => {
            println!("* disconnected, reconnecting (attempt {})", state.attempt_count)
        }
        ConnectionStatus::Errored => println!("* error - type /restart to try again"),
        status => println!("* {}", status),
    }
}

fn print_message(message: &BotMessage) {
    match message {
        BotMessage::Chat { content } => println!("bot> {}", content),
        BotMessage::LenderRecommendation { match_score, lenders } => {
            println!("bot> lender recommendations (match score {})", match_score);
            for (i, lender) in lenders.iter().enumerate() {
                println!(
                    "  {}. {} - {}% - {}",
                    i + 1,
                    lender.name,
                    lender.interest_rate,
                    lender.reason
                );
            }
        }
    }
}

/// Value following `--config`, if any.
fn config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
