//! LoanBot client - keeps a chat connection to the gateway alive and decodes
//! what the bot sends back.

pub mod config;
pub mod error;
pub mod reconnect;
pub mod transport;

pub use config::{Config, ReconnectPolicy};
pub use error::ClientError;
pub use reconnect::{ConnectionStatus, ReconnectionManager, ReconnectionState};
pub use transport::{Connector, Link, LinkEvent, Peer, TransportError, WsConnector};
