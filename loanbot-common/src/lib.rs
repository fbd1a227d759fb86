//! LoanBot Common Types
//!
//! Wire messages shared by the relay gateway and its clients.

pub mod message;

pub use message::{BotMessage, DecodeError, Lender};
