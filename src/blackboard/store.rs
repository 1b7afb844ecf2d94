//! Session-keyed collection of blackboards.

use std::sync::Arc;

use dashmap::DashMap;

use super::view::Blackboard;

/// Blackboards indexed by session id.
///
/// Each orchestrated request owns one board. Boards are handed out as
/// `Arc` so units can keep their own reference while the store is pruned.
#[derive(Debug, Default)]
pub struct BlackboardStore {
    boards: DashMap<String, Arc<Blackboard>>,
}

impl BlackboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh board for `session_id`, replacing any previous one.
    pub fn create(&self, session_id: &str) -> Arc<Blackboard> {
        let board = Arc::new(Blackboard::new(session_id));
        if self
            .boards
            .insert(session_id.to_string(), Arc::clone(&board))
            .is_some()
        {
            log::warn!("Replaced existing blackboard for session {}", session_id);
        }
        board
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Blackboard>> {
        self.boards.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<Blackboard> {
        Arc::clone(
            self.boards
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Blackboard::new(session_id)))
                .value(),
        )
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Blackboard>> {
        self.boards.remove(session_id).map(|(_, board)| board)
    }

    /// Keep only the `keep` most recently updated boards.
    pub fn retain_latest(&self, keep: usize) -> usize {
        if self.boards.len() <= keep {
            return 0;
        }
        let mut ages: Vec<(String, chrono::DateTime<chrono::Utc>)> = self
            .boards
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().updated_at()))
            .collect();
        ages.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = 0;
        for (session_id, _) in ages.into_iter().skip(keep) {
            if self.boards.remove(&session_id).is_some() {
                removed += 1;
            }
        }
        log::debug!("Pruned {} blackboard(s)", removed);
        removed
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_get() {
        let store = BlackboardStore::new();
        let board = store.create("req-1");
        board.share("k", json!(1), None);

        let again = store.get("req-1").unwrap();
        assert_eq!(again.get_shared("k"), Some(json!(1)));
        assert!(store.get("req-2").is_none());
    }

    #[test]
    fn test_get_or_create_reuses_board() {
        let store = BlackboardStore::new();
        let a = store.get_or_create("s");
        let b = store.get_or_create("s");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = BlackboardStore::new();
        store.create("s");
        assert!(store.remove("s").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_retain_latest_drops_oldest() {
        let store = BlackboardStore::new();
        for i in 0..4 {
            store.create(&format!("s{}", i)).share("k", json!(i), None);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let removed = store.retain_latest(2);
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 2);
        assert!(store.get("s0").is_none() && store.get("s1").is_none());
        assert!(store.get("s2").is_some() && store.get("s3").is_some());
        assert_eq!(store.retain_latest(5), 0);
    }
}
