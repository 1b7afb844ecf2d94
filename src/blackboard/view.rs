//! Blackboard — versioned shared state of one coordination session.
//!
//! All state lives behind a single `RwLock`. Every mutating call bumps the
//! version by exactly one while holding the write lock, so the version
//! observed by readers never goes backwards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::slot::{BoardAction, HistoryRecord, ParticipantLog, SharedSlot, UpdateRecord};

/// Everything a blackboard holds. Cloned wholesale by snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: BTreeMap<String, ParticipantLog>,
    pub shared: BTreeMap<String, SharedSlot>,
    /// Long-term memory results, kept apart from `shared` so keys never collide.
    pub memory_context: BTreeMap<String, Value>,
    pub history: Vec<HistoryRecord>,
}

impl BoardState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            version: 1,
            created_at: now,
            updated_at: now,
            participants: BTreeMap::new(),
            shared: BTreeMap::new(),
            memory_context: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    fn bump(&mut self, action: BoardAction, participant: Option<&str>, subject: Option<&str>) {
        let now = Utc::now();
        self.version += 1;
        self.updated_at = now;
        self.history.push(HistoryRecord {
            timestamp: now,
            action,
            participant: participant.map(str::to_string),
            subject: subject.map(str::to_string),
            version: self.version,
        });
    }
}

/// A point-in-time copy of a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackboardSnapshot {
    pub snapshot_id: String,
    pub session_id: String,
    pub taken_at: DateTime<Utc>,
    pub state: BoardState,
}

/// Shared state for one session.
///
/// # Example
///
/// ```
/// use tripcrew::blackboard::Blackboard;
///
/// let bb = Blackboard::new("req-1");
/// bb.update("attraction_search", serde_json::json!({"status": "processing"}), "info");
/// bb.share("weather_info", serde_json::json!("sunny"), Some("weather_query"));
///
/// assert_eq!(bb.get_shared("weather_info"), Some(serde_json::json!("sunny")));
/// assert_eq!(bb.version(), 3);
/// ```
#[derive(Debug)]
pub struct Blackboard {
    session_id: String,
    state: RwLock<BoardState>,
}

impl Blackboard {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        log::debug!("Blackboard created - session: {}", session_id);
        Self {
            session_id,
            state: RwLock::new(BoardState::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().updated_at
    }

    // --- Participant updates ---

    /// Append `payload` to `participant`'s log under `category`.
    pub fn update(&self, participant: &str, payload: Value, category: &str) {
        let mut state = self.state.write();
        let record = UpdateRecord {
            timestamp: Utc::now(),
            category: category.to_string(),
            payload,
        };
        state
            .participants
            .entry(participant.to_string())
            .or_insert_with(ParticipantLog::new)
            .push(record);
        state.bump(BoardAction::Update, Some(participant), Some(category));
        log::debug!(
            "Blackboard updated - session: {}, participant: {}, category: {}",
            self.session_id,
            participant,
            category
        );
    }

    /// Updates written by `participant`, oldest first.
    pub fn participant_updates(&self, participant: &str) -> Vec<UpdateRecord> {
        self.state
            .read()
            .participants
            .get(participant)
            .map(|log| log.updates.clone())
            .unwrap_or_default()
    }

    /// Latest update of `participant`, if any.
    pub fn latest_update(&self, participant: &str) -> Option<UpdateRecord> {
        self.state
            .read()
            .participants
            .get(participant)
            .and_then(|log| log.updates.last().cloned())
    }

    // --- Shared data ---

    /// Upsert a shared value. Last writer wins.
    pub fn share(&self, key: &str, value: Value, origin: Option<&str>) {
        let mut state = self.state.write();
        state
            .shared
            .insert(key.to_string(), SharedSlot::new(value, origin.map(str::to_string)));
        state.bump(BoardAction::Share, origin, Some(key));
        log::debug!(
            "Data shared - session: {}, key: {}, from: {:?}",
            self.session_id,
            key,
            origin
        );
    }

    pub fn get_shared(&self, key: &str) -> Option<Value> {
        self.state.read().shared.get(key).map(|slot| slot.value.clone())
    }

    /// The full slot, including origin and write time.
    pub fn shared_slot(&self, key: &str) -> Option<SharedSlot> {
        self.state.read().shared.get(key).cloned()
    }

    /// Copy of every shared value at call time.
    pub fn get_all_shared(&self) -> BTreeMap<String, Value> {
        self.state
            .read()
            .shared
            .iter()
            .map(|(k, slot)| (k.clone(), slot.value.clone()))
            .collect()
    }

    pub fn has_shared(&self, key: &str) -> bool {
        self.state.read().shared.contains_key(key)
    }

    // --- Memory context ---

    pub fn add_memory_context(&self, kind: &str, payload: Value) {
        let mut state = self.state.write();
        state.memory_context.insert(kind.to_string(), payload);
        state.bump(BoardAction::MemoryContext, None, Some(kind));
    }

    pub fn get_memory_context(&self) -> BTreeMap<String, Value> {
        self.state.read().memory_context.clone()
    }

    // --- History ---

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.state.read().history.clone()
    }

    /// Compact JSON view attached to outgoing hub messages.
    pub fn context_summary(&self) -> Value {
        let state = self.state.read();
        let shared: serde_json::Map<String, Value> = state
            .shared
            .iter()
            .map(|(k, slot)| (k.clone(), slot.value.clone()))
            .collect();
        json!({
            "session_id": self.session_id,
            "version": state.version,
            "participants": state.participants.keys().collect::<Vec<_>>(),
            "shared": shared,
        })
    }

    // --- Snapshots ---

    pub fn snapshot(&self) -> BlackboardSnapshot {
        let state = self.state.read().clone();
        BlackboardSnapshot {
            snapshot_id: format!("{}_snapshot_{}", self.session_id, state.version),
            session_id: self.session_id.clone(),
            taken_at: Utc::now(),
            state,
        }
    }

    /// Replace the whole state with `snapshot`.
    ///
    /// Writes made since the snapshot are discarded, not merged. The version
    /// continues from the larger of the current and the snapshot version.
    pub fn restore(&self, snapshot: &BlackboardSnapshot) {
        let mut state = self.state.write();
        let floor = state.version.max(snapshot.state.version);
        *state = snapshot.state.clone();
        state.version = floor;
        state.bump(BoardAction::Restore, None, Some(&snapshot.snapshot_id));
        log::info!(
            "Blackboard restored - session: {}, snapshot: {}",
            self.session_id,
            snapshot.snapshot_id
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_board_is_empty() {
        let bb = Blackboard::new("s");
        assert_eq!(bb.version(), 1);
        assert!(bb.get_all_shared().is_empty());
        assert!(bb.get_memory_context().is_empty());
        assert!(bb.history().is_empty());
    }

    #[test]
    fn test_version_strictly_increases() {
        let bb = Blackboard::new("s");
        let mut last = bb.version();
        for i in 0..5 {
            bb.update("unit", json!({"i": i}), "info");
            assert!(bb.version() > last);
            last = bb.version();
            bb.share(&format!("k{}", i % 2), json!(i), Some("unit"));
            assert!(bb.version() > last);
            last = bb.version();
        }
        bb.add_memory_context("preferences", json!(["history"]));
        assert!(bb.version() > last);
    }

    #[test]
    fn test_share_distinct_keys() {
        let bb = Blackboard::new("s");
        for i in 0..7 {
            bb.share(&format!("key{}", i), json!(i), None);
        }
        assert_eq!(bb.get_all_shared().len(), 7);
    }

    #[test]
    fn test_share_same_key_overwrites() {
        let bb = Blackboard::new("s");
        bb.share("hotel", json!("A"), Some("lodging"));
        let v1 = bb.version();
        bb.share("hotel", json!("B"), Some("planner"));

        let slot = bb.shared_slot("hotel").unwrap();
        assert_eq!(slot.value, json!("B"));
        assert_eq!(slot.origin.as_deref(), Some("planner"));
        assert!(bb.version() > v1);
        assert_eq!(bb.get_all_shared().len(), 1);
    }

    #[test]
    fn test_get_all_shared_is_a_copy() {
        let bb = Blackboard::new("s");
        bb.share("a", json!(1), None);
        let snapshot = bb.get_all_shared();
        bb.share("b", json!(2), None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(bb.get_all_shared().len(), 2);
    }

    #[test]
    fn test_participant_updates_ordered() {
        let bb = Blackboard::new("s");
        bb.update("weather", json!({"status": "processing"}), "info");
        bb.update("weather", json!({"status": "completed"}), "result");
        bb.update("lodging", json!({}), "info");

        let updates = bb.participant_updates("weather");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].category, "info");
        assert_eq!(updates[1].category, "result");
        assert_eq!(bb.latest_update("weather").unwrap().payload["status"], "completed");
        assert!(bb.participant_updates("nobody").is_empty());
        assert_eq!(bb.history().len(), 3);
    }

    #[test]
    fn test_memory_context_is_separate_namespace() {
        let bb = Blackboard::new("s");
        bb.share("preferences", json!("shared"), None);
        bb.add_memory_context("preferences", json!("memory"));
        assert_eq!(bb.get_shared("preferences"), Some(json!("shared")));
        assert_eq!(bb.get_memory_context()["preferences"], json!("memory"));
    }

    #[test]
    fn test_snapshot_restore() {
        let bb = Blackboard::new("s");
        bb.share("a", json!(1), None);
        let snap = bb.snapshot();
        assert_eq!(snap.snapshot_id, format!("s_snapshot_{}", snap.state.version));

        bb.share("b", json!(2), None);
        bb.update("unit", json!({}), "info");
        let before = bb.version();

        bb.restore(&snap);
        assert!(bb.version() > before);
        assert_eq!(bb.get_all_shared().len(), 1);
        assert!(bb.get_shared("b").is_none());
        assert!(bb.participant_updates("unit").is_empty());
    }

    #[test]
    fn test_context_summary_lists_shared() {
        let bb = Blackboard::new("req-9");
        bb.share("weather_info", json!("rain"), Some("weather"));
        let summary = bb.context_summary();
        assert_eq!(summary["session_id"], "req-9");
        assert_eq!(summary["shared"]["weather_info"], "rain");
    }

    #[test]
    fn test_concurrent_writers_never_lose_versions() {
        let bb = Arc::new(Blackboard::new("s"));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bb = Arc::clone(&bb);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        bb.share(&format!("t{}-{}", t, i), json!(i), None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bb.version(), 1 + 200);
        assert_eq!(bb.get_all_shared().len(), 200);
    }
}
