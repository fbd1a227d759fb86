//! Bot messages carried in JSON text frames.
//!
//! The relay never looks inside frames; these types are only used on the
//! client side of the gateway, where a frame is validated before it is
//! handed to the presentation layer.
//!
//! # Wire format
//!
//! Every message is an object with a `type` tag and a `data` payload:
//!
//! ```json
//! {"type": "chat", "data": {"content": "Hello!"}}
//! {"type": "lenders", "data": {"match_score": 87, "top_lenders": [
//!     {"name": "Acme Credit", "interest_rate": 6.4, "reason": "Low rate"}
//! ]}}
//! ```
//!
//! Anything else is a [`DecodeError`].

use serde::{Deserialize, Serialize};
use serde_json::error::Category;

/// A validated message from the chat backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BotMessage {
    /// Conversational reply.
    #[serde(rename = "chat")]
    Chat { content: String },
    /// Lender matches produced once the backend has collected enough details.
    #[serde(rename = "lenders")]
    LenderRecommendation {
        match_score: f64,
        /// Ordered best match first, as sent by the backend.
        #[serde(rename = "top_lenders")]
        lenders: Vec<Lender>,
    },
}

/// A single lender in a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lender {
    pub name: String,
    pub interest_rate: f64,
    pub reason: String,
}

/// Why a frame could not be turned into a [`BotMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("frame does not match any bot message shape: {0}")]
    UnknownShape(String),

    #[error("binary frames do not carry bot messages")]
    BinaryFrame,
}

impl BotMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| match e.classify() {
            Category::Syntax | Category::Eof | Category::Io => DecodeError::InvalidJson(e.to_string()),
            Category::Data => DecodeError::UnknownShape(e.to_string()),
        })
    }

    /// Encode into the JSON text frame the backend would send.
    pub fn encode(&self) -> String {
        // Strings, numbers and sequences only: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            BotMessage::Chat { .. } => "chat",
            BotMessage::LenderRecommendation { .. } => "lenders",
        }
    }
}
