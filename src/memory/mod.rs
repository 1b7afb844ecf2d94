//! Long-term memory collaborator.
//!
//! Memory is keyed by subject (usually a user id) and grouped by kind
//! (`trip_planning`, `feedback`, ...). Retrieval ranks records by
//! similarity to a free-text query.

pub mod in_memory;
pub mod recall;

pub use in_memory::InMemoryStore;
pub use recall::MemoryRecall;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One retrieved memory with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub subject: String,
    pub kind: String,
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
    /// Similarity in `[0, 1]`; higher is closer.
    pub score: f64,
}

/// Storage and ranked retrieval of memories.
#[async_trait]
pub trait MemoryStore: Send + Sync + std::fmt::Debug {
    async fn store(&self, subject: &str, kind: &str, payload: Value) -> anyhow::Result<()>;

    /// Up to `limit` records of `subject`, best match first, optionally
    /// restricted to `kind_filter`.
    async fn retrieve(
        &self,
        subject: &str,
        query: &str,
        limit: usize,
        kind_filter: Option<&str>,
    ) -> anyhow::Result<Vec<MemoryRecord>>;
}
