//! Reconnection manager.
//!
//! Owns one logical connection to the gateway. A driver task opens physical
//! connections through a [`Connector`], decodes incoming frames and applies
//! the backoff rules of [`ReconnectionState`]. The handle exposes the
//! current state, the latest decoded message and the latest local error
//! through `watch` cells, so callers see a stable interface however many
//! reconnects happen underneath.

use std::sync::Arc;

use loanbot_common::{BotMessage, DecodeError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{CloseOutcome, ConnectionStatus, ReconnectionState};
use crate::config::ReconnectPolicy;
use crate::error::{ClientError, Result};
use crate::transport::{Connector, Link, LinkEvent};

/// Cells written by the driver and read by the handle.
struct Shared {
    state: watch::Sender<ReconnectionState>,
    message: watch::Sender<Option<BotMessage>>,
    error: watch::Sender<Option<ClientError>>,
    /// Writer for the currently open connection, if any.
    outbound: watch::Sender<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn new(initial: ReconnectionState) -> Self {
        Self {
            state: watch::channel(initial).0,
            message: watch::channel(None).0,
            error: watch::channel(None).0,
            outbound: watch::channel(None).0,
        }
    }

    fn publish(&self, state: ReconnectionState) {
        self.state.send_replace(state);
    }

    fn set_error(&self, error: Option<ClientError>) {
        self.error.send_replace(error);
    }

    fn deliver(&self, decoded: std::result::Result<BotMessage, DecodeError>) {
        match decoded {
            Ok(message) => {
                tracing::debug!("Received {} message", message.kind());
                self.message.send_replace(Some(message));
            }
            Err(e) => {
                tracing::warn!("WebSocket message parsing error: {}", e);
                self.set_error(Some(ClientError::Decode(e)));
            }
        }
    }
}

struct Driver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Handle to a self-healing connection.
pub struct ReconnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    driver: Option<Driver>,
}

impl ReconnectionManager {
    /// Start connecting right away. Must be called inside a tokio runtime.
    pub fn start(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let shared = Arc::new(Shared::new(ReconnectionState::new(&policy)));
        let mut manager = Self {
            connector,
            policy,
            shared,
            driver: None,
        };
        manager.spawn_driver();
        manager
    }

    fn spawn_driver(&mut self) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(
            self.connector.clone(),
            self.policy,
            self.shared.clone(),
            cancel.clone(),
        ));
        self.driver = Some(Driver { cancel, task });
    }

    /// Current state snapshot.
    pub fn state(&self) -> ReconnectionState {
        *self.shared.state.borrow()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.borrow().status
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReconnectionState> {
        self.shared.state.subscribe()
    }

    /// Latest successfully decoded message.
    pub fn last_message(&self) -> Option<BotMessage> {
        self.shared.message.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Option<BotMessage>> {
        self.shared.message.subscribe()
    }

    /// Latest local error: decode failure, refused send, or the reason for `Errored`.
    pub fn last_error(&self) -> Option<ClientError> {
        self.shared.error.borrow().clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<ClientError>> {
        self.shared.error.subscribe()
    }

    /// Send a text frame on the open connection.
    ///
    /// Only allowed while connected. Nothing is queued: a refused payload is
    /// reported and dropped.
    pub fn send(&self, payload: impl Into<String>) -> Result<()> {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(self.refuse(status));
        }

        let sent = match self.shared.outbound.borrow().as_ref() {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            // Connection dropped between the status check and the write.
            Err(self.refuse(ConnectionStatus::Disconnected))
        }
    }

    fn refuse(&self, status: ConnectionStatus) -> ClientError {
        let error = ClientError::NotConnected(status);
        tracing::warn!("{}", error);
        self.shared.set_error(Some(error.clone()));
        error
    }

    /// Stop the current driver and start over with a fresh backoff.
    ///
    /// This is the only way out of `Errored`.
    pub async fn restart(&mut self) {
        self.stop_driver().await;
        self.shared.set_error(None);
        self.shared.publish(ReconnectionState::new(&self.policy));
        tracing::info!("Restarting connection to {}", self.connector.endpoint());
        self.spawn_driver();
    }

    /// Close the connection and cancel any pending reconnection.
    pub async fn shutdown(&mut self) {
        self.stop_driver().await;
    }

    async fn stop_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.cancel.cancel();
            if let Err(e) = driver.task.await {
                tracing::error!("Connection driver failed: {}", e);
            }
        }
    }
}

impl Drop for ReconnectionManager {
    fn drop(&mut self) {
        if let Some(driver) = &self.driver {
            driver.cancel.cancel();
        }
    }
}

/// How a connection ended.
enum LinkEnd {
    Closed { clean: bool },
    Shutdown,
}

async fn drive(
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut state = ReconnectionState::new(&policy);

    loop {
        if !state.begin_connect() {
            return;
        }
        shared.publish(state);
        tracing::info!(
            "Connecting to {} (attempt {})",
            connector.endpoint(),
            state.attempt_count
        );

        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                state.stop();
                shared.publish(state);
                return;
            }
            result = connector.connect() => result,
        };

        let clean = match opened {
            Ok(link) => {
                shared.outbound.send_replace(Some(link.sender()));
                state.opened(&policy);
                shared.set_error(None);
                shared.publish(state);
                tracing::info!("Connected to {}", connector.endpoint());

                let end = run_link(link, &shared, &cancel).await;
                shared.outbound.send_replace(None);
                match end {
                    LinkEnd::Closed { clean } => clean,
                    LinkEnd::Shutdown => {
                        state.stop();
                        shared.publish(state);
                        tracing::info!("Connection to {} shut down", connector.endpoint());
                        return;
                    }
                }
            }
            Err(e) if e.is_terminal() => {
                tracing::error!("Cannot connect to {}: {}", connector.endpoint(), e);
                state.fail();
                shared.set_error(Some(ClientError::Transport(e.to_string())));
                shared.publish(state);
                return;
            }
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", connector.endpoint(), e);
                false
            }
        };

        match state.closed(clean, &policy) {
            CloseOutcome::Stay => {
                shared.publish(state);
                tracing::info!("Connection to {} closed cleanly", connector.endpoint());
                return;
            }
            CloseOutcome::GiveUp => {
                tracing::error!(
                    "Failed to connect to {} after {} attempts",
                    connector.endpoint(),
                    state.attempt_count
                );
                shared.set_error(Some(ClientError::RetriesExhausted {
                    attempts: state.attempt_count,
                }));
                shared.publish(state);
                return;
            }
            CloseOutcome::Retry(delay) => {
                shared.publish(state);
                tracing::info!(
                    "Reconnecting in {} ms ({}/{})",
                    delay.as_millis(),
                    state.attempt_count,
                    policy.max_attempts
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Read events until the link closes or the manager shuts down.
///
/// The link is dropped on return; once the outbound cell is cleared too the
/// transport closes the socket.
async fn run_link(mut link: Link, shared: &Shared, cancel: &CancellationToken) -> LinkEnd {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return LinkEnd::Shutdown,
            event = link.next_event() => event,
        };

        match event {
            LinkEvent::Text(text) => shared.deliver(BotMessage::decode(&text)),
            LinkEvent::Binary(_) => shared.deliver(Err(DecodeError::BinaryFrame)),
            LinkEvent::Closed { clean } => return LinkEnd::Closed { clean },
        }
    }
}
