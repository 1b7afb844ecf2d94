//! Typed messages exchanged between units through the [`Hub`](super::Hub).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The intent carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ask a peer for information.
    Query,
    /// Offer unsolicited information to a peer.
    Suggestion,
    /// One round of a negotiation.
    Negotiation,
    /// Feedback on a peer's output.
    Feedback,
    /// A finished result.
    Result,
    /// Ask a peer to perform work.
    Request,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Query,
        MessageKind::Suggestion,
        MessageKind::Negotiation,
        MessageKind::Feedback,
        MessageKind::Result,
        MessageKind::Request,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Query => "query",
            MessageKind::Suggestion => "suggestion",
            MessageKind::Negotiation => "negotiation",
            MessageKind::Feedback => "feedback",
            MessageKind::Result => "result",
            MessageKind::Request => "request",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single point-to-point message.
///
/// Fields are private: a message is immutable once built. The builder
/// methods consume `self`, so they can only be used before the message is
/// handed to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    sender: String,
    receiver: String,
    kind: MessageKind,
    payload: Value,
    context: Value,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with an empty context.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        kind: MessageKind,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            receiver: receiver.into(),
            kind,
            payload,
            context: Value::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
        }
    }

    /// Builder: attach a context snapshot.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether `unit` is the sender or the receiver.
    pub fn involves(&self, unit: &str) -> bool {
        self.sender == unit || self.receiver == unit
    }
}
