//! Transport message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value written to a telemetry sequence.
///
/// Sequences hold either numbers (relay states, raw readings) or text
/// (status projections, formatted averages). Serialized untagged so the
/// wire form is just the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceValue {
    /// Numeric value
    Number(f64),

    /// Text value
    Text(String),
}

impl SequenceValue {
    /// Returns the numeric form, parsing text values when possible.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Returns the wire payload written to the transport.
    pub fn to_payload(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for SequenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for SequenceValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u16> for SequenceValue {
    fn from(n: u16) -> Self {
        Self::Number(n as f64)
    }
}

impl From<String> for SequenceValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SequenceValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Inbound control message delivered to subscribers.
///
/// The server sends typed messages (generator override, test alarm);
/// the daemon consumes them through `Controller::subscribe()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message type discriminator (e.g. "generator_override")
    pub message_type: String,

    /// Free-form parameters
    pub params: serde_json::Value,
}

impl InboundMessage {
    /// Creates a new inbound message.
    pub fn new(message_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            params,
        }
    }

    /// Creates a message with no parameters.
    pub fn bare(message_type: impl Into<String>) -> Self {
        Self::new(message_type, serde_json::Value::Null)
    }

    /// Returns a string parameter by key.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Returns an integer parameter by key, accepting both numeric and
    /// string-encoded values (servers send both forms).
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        let value = self.params.get(key)?;
        if let Some(n) = value.as_i64() {
            return Some(n);
        }
        value.as_str().and_then(|s| s.trim().parse().ok())
    }
}

/// Outbound typed message published to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Message type discriminator (e.g. "watchdog")
    pub message_type: String,

    /// Free-form parameters
    pub params: serde_json::Value,

    /// Client-side send time
    pub sent_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Creates an envelope stamped with the current time.
    pub fn new(message_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            params,
            sent_at: Utc::now(),
        }
    }
}

/// Outbound email request delivered by the server-side bridge.
///
/// The client never speaks SMTP; it queues the envelope on the
/// transport and the server sends the mail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEnvelope {
    /// Destination address
    pub recipient: String,

    /// Subject line
    pub subject: String,

    /// Plain-text body
    pub body: String,

    /// Client-side queue time
    pub queued_at: DateTime<Utc>,
}

impl EmailEnvelope {
    /// Creates an envelope stamped with the current time.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            queued_at: Utc::now(),
        }
    }
}
