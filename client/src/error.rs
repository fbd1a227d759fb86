//! Error types surfaced to the presentation layer.

use loanbot_common::DecodeError;

use crate::reconnect::ConnectionStatus;

/// Local errors of the client. None of them closes the connection by itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot send message: connection is {0}")]
    NotConnected(ConnectionStatus),

    #[error("Failed to parse message from server: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to connect after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Connection error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
