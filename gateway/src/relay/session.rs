//! Relay session state.
//!
//! Transition rules for one client/backend pair, kept free of I/O so the
//! cascade rules can be tested on their own. The driver in `ws.rs` feeds
//! events in and acts on the answers.

use std::time::Instant;

use uuid::Uuid;

use super::frame::LegDown;

/// One of the two physical connections of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Backend,
}

impl Leg {
    pub fn opposite(self) -> Leg {
        match self {
            Leg::Client => Leg::Backend,
            Leg::Backend => Leg::Client,
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Client => write!(f, "client"),
            Leg::Backend => write!(f, "backend"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// What the driver must do after a leg went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cascade {
    /// Leg that went down first.
    pub origin: Leg,
    pub reason: LegDown,
    /// Sibling leg to terminate.
    pub terminate: Leg,
}

#[derive(Debug)]
pub struct RelaySession {
    id: Uuid,
    state: SessionState,
    started: Instant,
    to_backend: u64,
    to_client: u64,
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Active,
            started: Instant::now(),
            to_backend: 0,
            to_client: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames are only handed to the opposite leg while active.
    pub fn can_forward(&self) -> bool {
        self.state == SessionState::Active
    }

    /// A frame read from `from` reached the opposite leg.
    pub fn record_forwarded(&mut self, from: Leg) {
        match from {
            Leg::Client => self.to_backend += 1,
            Leg::Backend => self.to_client += 1,
        }
    }

    /// A leg closed or failed.
    ///
    /// The first call moves the session to `Closing` and names the sibling to
    /// terminate. Later calls (the sibling reporting its own close while being
    /// torn down) return `None`.
    pub fn leg_down(&mut self, leg: Leg, reason: LegDown) -> Option<Cascade> {
        if self.state != SessionState::Active {
            return None;
        }
        self.state = SessionState::Closing;
        Some(Cascade {
            origin: leg,
            reason,
            terminate: leg.opposite(),
        })
    }

    /// Both legs are gone.
    pub fn finish(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Frames forwarded as (client to backend, backend to client).
    pub fn forwarded(&self) -> (u64, u64) {
        (self.to_backend, self.to_client)
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}
