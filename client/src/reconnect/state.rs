//! Reconnection state machine.
//!
//! Pure transitions, no timers. The manager asks what to do after each
//! transport event and schedules the returned delay itself.

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Status of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Sticky until an explicit restart.
    Errored,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Errored => write!(f, "error"),
        }
    }
}

/// What to do after the underlying connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Clean close: stay disconnected.
    Stay,
    /// Open a new connection after the delay.
    Retry(Duration),
    /// Attempts exhausted: now errored.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectionState {
    pub status: ConnectionStatus,
    /// Reconnection attempts since the last successful open.
    pub attempt_count: u32,
    /// Delay before the next reconnection attempt.
    pub current_delay: Duration,
}

impl ReconnectionState {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt_count: 0,
            current_delay: policy.base_delay(),
        }
    }

    /// Start opening a connection. Refused once errored.
    pub fn begin_connect(&mut self) -> bool {
        if self.status == ConnectionStatus::Errored {
            return false;
        }
        self.status = ConnectionStatus::Connecting;
        true
    }

    /// The connection opened. Resets the backoff.
    pub fn opened(&mut self, policy: &ReconnectPolicy) -> bool {
        if self.status != ConnectionStatus::Connecting {
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.attempt_count = 0;
        self.current_delay = policy.base_delay();
        true
    }

    /// The connection closed, or failed to open.
    pub fn closed(&mut self, clean: bool, policy: &ReconnectPolicy) -> CloseOutcome {
        match self.status {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => {}
            ConnectionStatus::Disconnected => return CloseOutcome::Stay,
            ConnectionStatus::Errored => return CloseOutcome::GiveUp,
        }

        self.status = ConnectionStatus::Disconnected;
        if clean {
            return CloseOutcome::Stay;
        }
        if self.attempt_count >= policy.max_attempts {
            self.status = ConnectionStatus::Errored;
            return CloseOutcome::GiveUp;
        }

        let delay = self.current_delay;
        self.current_delay = (delay * 2).min(policy.max_delay());
        self.attempt_count += 1;
        CloseOutcome::Retry(delay)
    }

    /// Terminal transport error.
    pub fn fail(&mut self) {
        self.status = ConnectionStatus::Errored;
    }

    /// Owner shut the connection down.
    pub fn stop(&mut self) {
        if self.status != ConnectionStatus::Errored {
            self.status = ConnectionStatus::Disconnected;
        }
    }
}
