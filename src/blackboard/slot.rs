//! Entries stored on the blackboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A shared value and who wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSlot {
    pub value: Value,
    /// Participant that wrote the value, if known.
    pub origin: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl SharedSlot {
    pub fn new(value: Value, origin: Option<String>) -> Self {
        Self {
            value,
            origin,
            written_at: Utc::now(),
        }
    }
}

/// One entry in a participant's update log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub timestamp: DateTime<Utc>,
    /// Free-form category, e.g. `info`, `result`, `error`, `feedback`.
    pub category: String,
    pub payload: Value,
}

/// Ordered updates of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantLog {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub updates: Vec<UpdateRecord>,
}

impl ParticipantLog {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
            updates: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, record: UpdateRecord) {
        self.last_updated = record.timestamp;
        self.updates.push(record);
    }
}

/// What a history record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardAction {
    Update,
    Share,
    MemoryContext,
    Restore,
}

/// Global, session-wide audit entry written on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub action: BoardAction,
    pub participant: Option<String>,
    /// Update category, shared key or memory kind, depending on `action`.
    pub subject: Option<String>,
    /// Board version after the mutation.
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_log_tracks_last_update() {
        let mut log = ParticipantLog::new();
        let record = UpdateRecord {
            timestamp: Utc::now(),
            category: "info".into(),
            payload: serde_json::json!({"status": "processing"}),
        };
        log.push(record.clone());
        assert_eq!(log.updates.len(), 1);
        assert_eq!(log.last_updated, record.timestamp);
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let v = serde_json::to_value(BoardAction::MemoryContext).unwrap();
        assert_eq!(v, "memory_context");
    }
}
