//! Error types for the relay.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Why a relay session could not be established.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Backend unavailable at {url}: {source}")]
    UpstreamUnavailable {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Backend at {url} did not accept within {timeout:?}")]
    UpstreamTimeout { url: String, timeout: Duration },

    #[error("Client left before the backend connection opened")]
    ClientGone,
}

impl RelayError {
    /// Whether the failure is on the backend side (counted as an upstream failure).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamUnavailable { .. } | RelayError::UpstreamTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
