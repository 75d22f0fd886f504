//! Solution update envelopes
//!
//! The same JSON layout travels over the broker and over the client socket:
//!
//! ```json
//! {"message_type":"update","message":"optional note","solution":{"id":1,"user_id":5,...}}
//! ```
//!
//! `solution.user_id` and `solution.contest_id` drive access decisions, so the
//! decoder refuses envelopes without them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed event: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One evaluated (or re-evaluated) solution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Solution {
    pub id: i32,

    pub user_id: i32,
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub penalty: i32,
    #[serde(default)]
    pub time_stat: i32,
    #[serde(default)]
    pub memory_stat: i32,
    #[serde(default)]
    pub language: i32,

    #[serde(default)]
    pub problem_id: i32,
    #[serde(default)]
    pub problem_title: String,

    #[serde(default)]
    pub position: i32,

    pub contest_id: i32,
    #[serde(default)]
    pub contest_title: String,

    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Unit published on the broker and relayed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub solution: Solution,
}

impl EventEnvelope {
    pub fn new(message_type: impl Into<String>, solution: Solution) -> Self {
        Self {
            message_type: message_type.into(),
            message: None,
            solution,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Decode a broker payload
pub fn decode(bytes: &[u8]) -> Result<EventEnvelope, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Malformed)
}

/// Encode an envelope for the broker
pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(CodecError::Encode)
}

/// Encode an envelope as a WebSocket text frame body
pub fn encode_text(envelope: &EventEnvelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}
