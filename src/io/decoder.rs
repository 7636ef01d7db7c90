//! Presence payload decoding
//!
//! Each topic maps to one channel, and each channel has its own typed
//! payload. Anything that is not a JSON object with the required fields is
//! rejected as malformed.

use crate::domain::types::{ExhibitPayload, RoomPayload};
use crate::domain::{ExhibitDetection, IngestError, PresenceEvent, RoomId, RoomTransition};
use crate::infra::config::Config;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Logical channel a topic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Room entry sensors
    Room,
    /// Exhibit presence sensors
    Exhibit,
    /// Previous-presence channel, reserved
    Legacy,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Room => "room",
            Channel::Exhibit => "exhibit",
            Channel::Legacy => "legacy",
        }
    }
}

/// Maps configured topic names to channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRouter {
    room: String,
    exhibit: String,
    legacy: String,
}

impl TopicRouter {
    pub fn new(room: impl Into<String>, exhibit: impl Into<String>, legacy: impl Into<String>) -> Self {
        Self { room: room.into(), exhibit: exhibit.into(), legacy: legacy.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.room_topic(), config.exhibit_topic(), config.legacy_topic())
    }

    pub fn classify(&self, topic: &str) -> Option<Channel> {
        if topic == self.room {
            Some(Channel::Room)
        } else if topic == self.exhibit {
            Some(Channel::Exhibit)
        } else if topic == self.legacy {
            Some(Channel::Legacy)
        } else {
            None
        }
    }

    /// Topics to subscribe to, in channel order
    pub fn topics(&self) -> Vec<String> {
        vec![self.room.clone(), self.exhibit.clone(), self.legacy.clone()]
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a raw payload received on `topic`
///
/// Returns `Ok(None)` for channels that carry no events. The payload has no
/// timestamp of its own, so `received_at` stamps the event.
pub fn decode(
    channel: Channel,
    topic: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Option<PresenceEvent>, IngestError> {
    if channel == Channel::Legacy {
        return Ok(None);
    }

    let text = std::str::from_utf8(payload).map_err(|e| IngestError::malformed(topic, e))?;
    let value: Value = serde_json::from_str(text).map_err(|e| IngestError::malformed(topic, e))?;
    if !value.is_object() {
        return Err(IngestError::malformed(
            topic,
            format!("expected a JSON object, got {}", value_kind(&value)),
        ));
    }

    let event = match channel {
        Channel::Room => {
            let payload: RoomPayload =
                serde_json::from_value(value).map_err(|e| IngestError::malformed(topic, e))?;
            PresenceEvent::RoomTransition(RoomTransition {
                room_id: RoomId(payload.id),
                detected: payload.detected,
                timestamp: received_at,
            })
        }
        Channel::Exhibit => {
            let payload: ExhibitPayload =
                serde_json::from_value(value).map_err(|e| IngestError::malformed(topic, e))?;
            PresenceEvent::ExhibitDetection(ExhibitDetection {
                room_id: RoomId(payload.r_id),
                exhibit_id: payload.id,
                detected: payload.detected,
                timestamp: received_at,
            })
        }
        Channel::Legacy => return Ok(None),
    };

    Ok(Some(event))
}
