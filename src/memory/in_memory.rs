//! Process-local memory store with token-overlap ranking.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use super::{MemoryRecord, MemoryStore};

#[derive(Debug, Clone)]
struct Entry {
    kind: String,
    payload: Value,
    text: String,
    stored_at: DateTime<Utc>,
}

/// Memory kept in a `RwLock`ed map, lost on restart.
///
/// The score of a record is the share of query tokens found in the
/// record's text. An empty query returns the most recent records with a
/// score of zero.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Vec<Entry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, subject: &str) -> usize {
        self.entries.read().get(subject).map_or(0, Vec::len)
    }
}

/// Lowercased word tokens. CJK characters count as one token each since
/// they are not space-separated.
pub fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut word = String::new();
    for ch in text.chars() {
        if is_cjk(ch) {
            if !word.is_empty() {
                tokens.insert(std::mem::take(&mut word));
            }
            tokens.insert(ch.to_string());
        } else if ch.is_alphanumeric() {
            word.extend(ch.to_lowercase());
        } else if !word.is_empty() {
            tokens.insert(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }
    tokens
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, subject: &str, kind: &str, payload: Value) -> anyhow::Result<()> {
        let entry = Entry {
            kind: kind.to_string(),
            text: flatten(&payload),
            payload,
            stored_at: Utc::now(),
        };
        self.entries
            .write()
            .entry(subject.to_string())
            .or_default()
            .push(entry);
        log::debug!("Memory stored - subject: {}, kind: {}", subject, kind);
        Ok(())
    }

    async fn retrieve(
        &self,
        subject: &str,
        query: &str,
        limit: usize,
        kind_filter: Option<&str>,
    ) -> anyhow::Result<Vec<MemoryRecord>> {
        let entries = self.entries.read();
        let Some(list) = entries.get(subject) else {
            return Ok(Vec::new());
        };

        let query_tokens = tokenize(query);
        let candidates = list
            .iter()
            .enumerate()
            .filter(|(_, e)| kind_filter.map_or(true, |k| e.kind == k));

        let mut scored: Vec<(f64, usize, &Entry)> = if query_tokens.is_empty() {
            candidates.map(|(i, e)| (0.0, i, e)).collect()
        } else {
            candidates
                .filter_map(|(i, e)| {
                    let doc = tokenize(&e.text);
                    let hits = query_tokens.iter().filter(|t| doc.contains(*t)).count();
                    (hits > 0).then(|| (hits as f64 / query_tokens.len() as f64, i, e))
                })
                .collect()
        };
        // Best score first, newest first on ties.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, _, e)| MemoryRecord {
                subject: subject.to_string(),
                kind: e.kind.clone(),
                payload: e.payload.clone(),
                stored_at: e.stored_at,
                score,
            })
            .collect())
    }
}
