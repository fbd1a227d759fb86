//! Self-healing connection to the gateway.

mod manager;
mod state;

pub use manager::ReconnectionManager;
pub use state::{CloseOutcome, ConnectionStatus, ReconnectionState};
