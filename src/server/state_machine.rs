//! Chat state machine.
//!
//! Applies committed entries in order. `apply` is idempotent with respect to
//! replay from index 1, and never does I/O, so it has no failure modes.

use std::collections::BTreeSet;

use crate::command::Command;
use crate::common::GENERAL_ROOM;
use crate::server::log::Entry;

/// Flat, chronological view of a single committed entry, as served by
/// `GET /messages`. Carries the entry's original payload unchanged so
/// clients can filter by room and reconcile by `id`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommittedMessage {
    pub index: u64,
    pub term: u64,
    pub command: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct ChatStateMachine {
    rooms: BTreeSet<String>,
    /// All committed entries, in commit order, for `/messages`.
    applied: Vec<CommittedMessage>,
}

impl ChatStateMachine {
    pub fn new() -> ChatStateMachine {
        let mut rooms = BTreeSet::new();
        rooms.insert(GENERAL_ROOM.to_string());
        ChatStateMachine {
            rooms,
            applied: Vec::new(),
        }
    }

    /// Applies a single committed entry. Entries must be applied in strictly
    /// increasing index order; callers (the apply loop in `server::mod`) are
    /// responsible for that ordering.
    pub fn apply(&mut self, entry: &Entry) {
        match Command::from_value(&entry.command) {
            Command::RoomAdd { room, .. } => {
                self.rooms.insert(room);
            }
            Command::RoomDelete { room, .. } => {
                if room != GENERAL_ROOM {
                    self.rooms.remove(&room);
                }
            }
            Command::Chat { .. } => {}
            Command::Unknown => { /* forward-compatible no-op */ }
        }
        self.applied.push(CommittedMessage {
            index: entry.index,
            term: entry.term,
            command: entry.command.clone(),
        });
    }

    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains(room)
    }

    pub fn rooms(&self) -> Vec<String> {
        self.rooms.iter().cloned().collect()
    }

    /// Flat, deterministic, chronological view of every committed entry,
    /// ordered by log index ascending, for `GET /messages`.
    pub fn snapshot_messages(&self) -> Vec<CommittedMessage> {
        self.applied.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(index: u64, command: serde_json::Value) -> Entry {
        Entry { index, term: 1, command }
    }

    #[test]
    fn general_exists_from_the_start() {
        let sm = ChatStateMachine::new();
        assert!(sm.room_exists("general"));
    }

    #[test]
    fn room_add_is_idempotent() {
        let mut sm = ChatStateMachine::new();
        sm.apply(&entry(1, json!({"type": "room_add", "room": "dev", "user": "a"})));
        sm.apply(&entry(2, json!({"type": "room_add", "room": "dev", "user": "a"})));
        assert_eq!(sm.rooms().iter().filter(|r| *r == "dev").count(), 1);
    }

    #[test]
    fn general_cannot_be_deleted() {
        let mut sm = ChatStateMachine::new();
        sm.apply(&entry(1, json!({"type": "room_delete", "room": "general", "user": "a"})));
        assert!(sm.room_exists("general"));
    }

    #[test]
    fn chat_to_unknown_room_is_recorded_but_not_listed() {
        let mut sm = ChatStateMachine::new();
        sm.apply(&entry(
            1,
            json!({"type": "chat", "user": "bob", "text": "hi", "room": "ghost", "id": "u1"}),
        ));
        assert_eq!(sm.snapshot_messages().len(), 1);
        assert!(!sm.room_exists("ghost"));
    }

    #[test]
    fn room_lifecycle_preserves_history_after_delete() {
        let mut sm = ChatStateMachine::new();
        sm.apply(&entry(1, json!({"type": "room_add", "room": "dev", "user": "a"})));
        sm.apply(&entry(
            2,
            json!({"type": "chat", "user": "bob", "text": "hello dev", "room": "dev", "id": "u4"}),
        ));
        sm.apply(&entry(3, json!({"type": "room_delete", "room": "dev", "user": "a"})));
        assert!(!sm.room_exists("dev"));
        let msgs = sm.snapshot_messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].index, 2);
    }

    #[test]
    fn unknown_command_type_is_a_no_op() {
        let mut sm = ChatStateMachine::new();
        sm.apply(&entry(1, json!({"type": "future_thing", "data": 1})));
        assert_eq!(sm.snapshot_messages().len(), 1);
        assert_eq!(sm.rooms(), vec!["general".to_string()]);
    }

    #[test]
    fn replay_from_prefix_matches_incremental_apply() {
        let entries = vec![
            entry(1, json!({"type": "room_add", "room": "dev", "user": "a"})),
            entry(2, json!({"type": "chat", "user": "b", "text": "hi", "room": "dev", "id": "1"})),
            entry(3, json!({"type": "room_delete", "room": "dev", "user": "a"})),
        ];

        let mut incremental = ChatStateMachine::new();
        for e in &entries {
            incremental.apply(e);
        }

        let mut replayed = ChatStateMachine::new();
        for e in &entries {
            replayed.apply(e);
        }

        assert_eq!(incremental.rooms(), replayed.rooms());
        assert_eq!(
            incremental.snapshot_messages().len(),
            replayed.snapshot_messages().len()
        );
    }
}
