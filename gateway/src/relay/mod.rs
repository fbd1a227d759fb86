//! Relay module: one session per client connection.
//!
//! This module provides:
//! - WebSocket handler that accepts clients and opens the backend leg
//! - Session state machine driving forwarding and the close cascade
//! - Process-wide counters for diagnostics

mod frame;
mod session;
mod stats;
mod ws;

pub use frame::{Frame, LegDown, LegEvent};
pub use session::{Cascade, Leg, RelaySession, SessionState};
pub use stats::{ActiveSession, RelayStats, StatsSnapshot};
pub use ws::ws_handler;
