use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns the next process-wide message id. Ids start at 1.
pub fn next_message_id() -> u64 {
    MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

/// Identity of an edge node, taken verbatim from the `edgenode_id` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Returns the raw node identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Payload unit exchanged on every link.
///
/// `id` is assigned by the originating side and must survive every bridge
/// hop untouched. `reply` stays empty until a receiver stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender-assigned id, unique per sending process.
    pub id: u64,
    /// Creation time in unix seconds.
    pub timestamp: i64,
    /// Opaque payload.
    pub body: String,
    /// Annotation written by the receiver.
    pub reply: String,
}

impl Message {
    /// Creates a fresh outbound message with the next process-wide id.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            timestamp: Utc::now().timestamp(),
            body: body.into(),
            reply: String::new(),
        }
    }

    /// Marks the message as handled by `who`, keeping every other field.
    pub fn stamp_reply(&mut self, who: &str) {
        self.reply = format!(
            "touched by {who} at {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
    }

    /// Parses a text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(frame).map_err(|e| ProtoError::Decode(e.to_string()))
    }

    /// Renders the message as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encode(e.to_string()))
    }
}
