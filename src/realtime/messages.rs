//! Push channel message types.
//!
//! Every frame in either direction is a `{ "type": .., "payload": .. }`
//! envelope. Notification payloads are carried as raw JSON and only
//! interpreted by the store.

use serde::{Deserialize, Serialize};

/// Server -> Client message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Client -> Server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ClientMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }
}

pub mod system {
    use serde::{Deserialize, Serialize};

    /// Subscribe request (client -> server), sent right after connecting.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Subscribe {
        pub channel: String,
    }

    /// Subscription confirmation (server -> client).
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Subscribed {
        pub channel: String,
    }

    /// Error message (server -> client).
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Error {
        pub code: String,
        pub message: String,
    }
}

pub mod msg_types {
    /// Sent by server on successful connection.
    pub const CONNECTED: &str = "connected";
    /// Client subscribe request.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Server confirmation of a subscription.
    pub const SUBSCRIBED: &str = "subscribed";
    /// A notification for the subscribed user (server -> client).
    pub const NOTIFICATION: &str = "notification";
    /// Heartbeat request, either direction.
    pub const PING: &str = "ping";
    /// Heartbeat response, either direction.
    pub const PONG: &str = "pong";
    /// Server error response.
    pub const ERROR: &str = "error";
}

/// Name of the private notification channel of `user_id`.
pub fn user_channel(user_id: &str) -> String {
    format!("private-notifications.{}", user_id)
}
