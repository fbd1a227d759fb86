//! Frames and leg events.
//!
//! The two legs speak different WebSocket types (axum on the client side,
//! tungstenite on the backend side). Both are reduced to [`LegEvent`] so the
//! session logic is written once.

use axum::extract::ws::Message as ClientMessage;
use tokio_tungstenite::tungstenite::Message as BackendMessage;

/// Opaque data frame. Never inspected, only moved between legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_client(self) -> ClientMessage {
        match self {
            Frame::Text(text) => ClientMessage::Text(text),
            Frame::Binary(data) => ClientMessage::Binary(data),
        }
    }

    pub fn into_backend(self) -> BackendMessage {
        match self {
            Frame::Text(text) => BackendMessage::Text(text),
            Frame::Binary(data) => BackendMessage::Binary(data),
        }
    }
}

/// How a leg went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegDown {
    /// Peer sent a close frame.
    Closed,
    /// Stream ended without a close frame.
    Dropped,
    /// Transport error on read or write.
    Error(String),
}

impl std::fmt::Display for LegDown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegDown::Closed => write!(f, "closed"),
            LegDown::Dropped => write!(f, "dropped"),
            LegDown::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// One event read from a leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegEvent {
    Frame(Frame),
    /// Ping/pong; answered by the transport itself.
    Control,
    Down(LegDown),
}

impl LegEvent {
    pub fn from_client(item: Option<Result<ClientMessage, axum::Error>>) -> Self {
        match item {
            Some(Ok(ClientMessage::Text(text))) => LegEvent::Frame(Frame::Text(text)),
            Some(Ok(ClientMessage::Binary(data))) => LegEvent::Frame(Frame::Binary(data)),
            Some(Ok(ClientMessage::Ping(_) | ClientMessage::Pong(_))) => LegEvent::Control,
            Some(Ok(ClientMessage::Close(_))) => LegEvent::Down(LegDown::Closed),
            Some(Err(e)) => LegEvent::Down(LegDown::Error(e.to_string())),
            None => LegEvent::Down(LegDown::Dropped),
        }
    }

    pub fn from_backend(
        item: Option<Result<BackendMessage, tokio_tungstenite::tungstenite::Error>>,
    ) -> Self {
        match item {
            Some(Ok(BackendMessage::Text(text))) => LegEvent::Frame(Frame::Text(text)),
            Some(Ok(BackendMessage::Binary(data))) => LegEvent::Frame(Frame::Binary(data)),
            Some(Ok(BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_))) => {
                LegEvent::Control
            }
            Some(Ok(BackendMessage::Close(_))) => LegEvent::Down(LegDown::Closed),
            Some(Err(e)) => LegEvent::Down(LegDown::Error(e.to_string())),
            None => LegEvent::Down(LegDown::Dropped),
        }
    }
}
