//! Typed view over the opaque command payload carried by log entries.
//!
//! The log stores `serde_json::Value` untouched — unknown `type`s must
//! round-trip through the log unchanged. This module is only used by the
//! state machine when it's time to apply an entry; the consensus core and
//! HTTP front never parse into this type.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "chat")]
    Chat {
        user: String,
        text: String,
        room: String,
        id: String,
    },
    #[serde(rename = "room_add")]
    RoomAdd { room: String, user: String },
    #[serde(rename = "room_delete")]
    RoomDelete { room: String, user: String },
    /// Any other (or malformed) payload. Applied as a no-op, so a node
    /// running older code tolerates command types introduced later.
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Parses a raw command payload, falling back to `Unknown` rather than
    /// erroring — there is no failure mode for state-machine apply.
    pub fn from_value(value: &serde_json::Value) -> Command {
        serde_json::from_value(value.clone()).unwrap_or(Command::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_chat() {
        let v = json!({"type": "chat", "user": "alice", "text": "hi", "room": "general", "id": "u1"});
        match Command::from_value(&v) {
            Command::Chat { user, text, room, id } => {
                assert_eq!(user, "alice");
                assert_eq!(text, "hi");
                assert_eq!(room, "general");
                assert_eq!(id, "u1");
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_unknown() {
        let v = json!({"type": "future_feature", "blob": 42});
        assert!(matches!(Command::from_value(&v), Command::Unknown));
    }

    #[test]
    fn missing_type_is_unknown() {
        let v = json!({"user": "alice"});
        assert!(matches!(Command::from_value(&v), Command::Unknown));
    }
}
