//! Shared types for presence ingestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Newtype wrapper for room IDs to provide type safety
///
/// Rooms are numbered in visiting order; room 0 is the entry room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RoomId(pub i64);

impl RoomId {
    /// The entry room has no predecessor
    pub const ENTRY: RoomId = RoomId(0);

    /// Room a visitor came from when entering this one
    #[inline]
    pub fn previous(self) -> Option<RoomId> {
        if self == Self::ENTRY {
            None
        } else {
            Some(RoomId(self.0 - 1))
        }
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room sensor payload: `{"id": 1, "detected": true}`
#[derive(Debug, Deserialize)]
pub struct RoomPayload {
    pub id: i64,
    pub detected: bool,
}

/// Exhibit sensor payload: `{"r_id": 1, "id": "7", "detected": true}`
///
/// Exhibit sensors publish the exhibit id as either a number or a string.
#[derive(Debug, Deserialize)]
pub struct ExhibitPayload {
    pub r_id: i64,
    #[serde(default, deserialize_with = "deserialize_exhibit_id")]
    pub id: Option<String>,
    pub detected: bool,
}

fn deserialize_exhibit_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct ExhibitIdVisitor;

    impl<'de> Visitor<'de> for ExhibitIdVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer exhibit id")
        }

        fn visit_str<E>(self, value: &str) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_unit<E>(self) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(ExhibitIdVisitor)
}

/// Decoded presence event, one variant per origin topic
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Visitor entered (or left) a room
    RoomTransition(RoomTransition),
    /// Visitor detected in front of an exhibit
    ExhibitDetection(ExhibitDetection),
}

impl PresenceEvent {
    pub fn room_id(&self) -> RoomId {
        match self {
            PresenceEvent::RoomTransition(t) => t.room_id,
            PresenceEvent::ExhibitDetection(d) => d.room_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PresenceEvent::RoomTransition(t) => t.timestamp,
            PresenceEvent::ExhibitDetection(d) => d.timestamp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceEvent::RoomTransition(_) => "room_transition",
            PresenceEvent::ExhibitDetection(_) => "exhibit_detection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomTransition {
    pub room_id: RoomId,
    pub detected: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExhibitDetection {
    pub room_id: RoomId,
    pub exhibit_id: Option<String>,
    pub detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Persisted snapshot of a room's occupancy after a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorCountRecord {
    pub room_id: RoomId,
    pub visitor_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Persisted exhibit detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewingRecord {
    pub exhibit_id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_room() {
        assert_eq!(RoomId::ENTRY.previous(), None);
        assert_eq!(RoomId(1).previous(), Some(RoomId(0)));
        assert_eq!(RoomId(4).previous(), Some(RoomId(3)));
    }

    #[test]
    fn test_exhibit_id_accepts_number_or_string() {
        let numeric: ExhibitPayload =
            serde_json::from_str(r#"{"r_id": 1, "id": 7, "detected": true}"#).unwrap();
        assert_eq!(numeric.id.as_deref(), Some("7"));

        let text: ExhibitPayload =
            serde_json::from_str(r#"{"r_id": 1, "id": "mona", "detected": true}"#).unwrap();
        assert_eq!(text.id.as_deref(), Some("mona"));

        let missing: ExhibitPayload =
            serde_json::from_str(r#"{"r_id": 1, "detected": false}"#).unwrap();
        assert_eq!(missing.id, None);

        let null: ExhibitPayload =
            serde_json::from_str(r#"{"r_id": 1, "id": null, "detected": true}"#).unwrap();
        assert_eq!(null.id, None);
    }

    #[test]
    fn test_room_payload_requires_fields() {
        assert!(serde_json::from_str::<RoomPayload>(r#"{"id": 1}"#).is_err());
        assert!(serde_json::from_str::<RoomPayload>(r#"{"detected": true}"#).is_err());
        let ok: RoomPayload = serde_json::from_str(r#"{"id": 2, "detected": true}"#).unwrap();
        assert_eq!(ok.id, 2);
        assert!(ok.detected);
    }
}
