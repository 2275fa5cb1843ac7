// ABOUTME: Inbound event types for both directions of the relay
// ABOUTME: Matrix transaction events decoded one by one, and channel messages heard on IRC

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult};

pub const ROOM_MESSAGE: &str = "m.room.message";

/// Body of an application-service transaction push.
///
/// Events are kept as raw JSON so one undecodable event does not reject the
/// whole batch.
#[derive(Debug, Default, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// One room event from a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub room_id: String,
    pub user_id: String,
    pub content: Map<String, Value>,
}

/// Wire shape. Older homeservers send `user_id`, newer ones `sender`, some both.
#[derive(Deserialize)]
struct RawRoomEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    room_id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    content: Map<String, Value>,
}

impl RoomEvent {
    /// Decode a single event from a transaction.
    pub fn from_value(value: Value) -> BridgeResult<Self> {
        let raw: RawRoomEvent = serde_json::from_value(value)
            .map_err(|e| BridgeError::MalformedEvent(e.to_string()))?;
        let user_id = raw
            .user_id
            .or(raw.sender)
            .ok_or_else(|| BridgeError::MalformedEvent("event has no user_id or sender".into()))?;
        Ok(Self {
            event_id: raw.event_id.unwrap_or_default(),
            event_type: raw.event_type,
            room_id: raw.room_id,
            user_id,
            content: raw.content,
        })
    }

    /// The plain-text `body` of a message event.
    pub fn body(&self) -> BridgeResult<&str> {
        self.content
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BridgeError::MalformedEvent(format!(
                    "event {} has no string body",
                    self.event_id
                ))
            })
    }
}

/// A PRIVMSG heard by the listener connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub nick: String,
    pub target: String,
    pub text: String,
}
