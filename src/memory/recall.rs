//! Memory exposed to units as the `memory` capability.

use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::MemoryStore;
use crate::tools::base_tool::{Capability, ToolArguments};

pub const MEMORY_TOOL: &str = "memory";

/// `[TOOL_CALL:memory:...]` access to one subject's memories.
///
/// Actions: `search` (default; `query` or `recall` holds the text) and
/// `store` (`content` is saved under `kind`, default `note`).
#[derive(Debug, Clone)]
pub struct MemoryRecall {
    store: Arc<dyn MemoryStore>,
    subject: String,
    limit: usize,
}

impl MemoryRecall {
    pub fn new(store: Arc<dyn MemoryStore>, subject: impl Into<String>) -> Self {
        Self {
            store,
            subject: subject.into(),
            limit: 5,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl Capability for MemoryRecall {
    fn name(&self) -> &str {
        MEMORY_TOOL
    }

    fn description(&self) -> &str {
        "Recall what is known about the user. Arguments: query, or action=store,content=..."
    }

    fn default_argument_key(&self) -> &str {
        "query"
    }

    fn bare_arguments(&self, raw: &str) -> ToolArguments {
        let mut args = ToolArguments::new();
        args.insert("action".into(), "search".into());
        args.insert("query".into(), raw.to_string());
        args
    }

    async fn invoke(&self, args: &ToolArguments) -> anyhow::Result<String> {
        let action = args.get("action").map(String::as_str).unwrap_or("search");
        match action {
            "search" | "recall" => {
                let query = args
                    .get("query")
                    .or_else(|| args.get("recall"))
                    .or_else(|| args.get("input"))
                    .map(String::as_str)
                    .unwrap_or("");
                let records = self
                    .store
                    .retrieve(&self.subject, query, self.limit, args.get("kind").map(String::as_str))
                    .await?;
                if records.is_empty() {
                    return Ok("No related memories.".to_string());
                }
                let items: Vec<Value> = records
                    .iter()
                    .map(|r| json!({"kind": r.kind, "score": r.score, "payload": r.payload}))
                    .collect();
                Ok(Value::Array(items).to_string())
            }
            "store" => {
                let content = args
                    .get("content")
                    .or_else(|| args.get("input"))
                    .ok_or_else(|| anyhow!("missing argument: content"))?;
                let kind = args.get("kind").map(String::as_str).unwrap_or("note");
                self.store.store(&self.subject, kind, json!(content)).await?;
                Ok(format!("Stored memory under {}", kind))
            }
            other => bail!("unknown memory action: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn test_bare_arguments_search() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        store.store("u1", "trip_planning", json!("beijing history")).await.unwrap();

        let recall = MemoryRecall::new(store, "u1");
        let args = recall.bare_arguments("beijing");
        assert_eq!(args["action"], "search");

        let out: Value = serde_json::from_str(&recall.invoke(&args).await.unwrap()).unwrap();
        assert_eq!(out[0]["kind"], "trip_planning");
    }

    #[tokio::test]
    async fn test_store_then_recall_key() {
        let recall = MemoryRecall::new(Arc::new(InMemoryStore::new()), "u2");
        let mut args = ToolArguments::new();
        args.insert("action".into(), "store".into());
        args.insert("content".into(), "prefers quiet hotels".into());
        assert!(recall.invoke(&args).await.unwrap().contains("note"));

        let mut args = ToolArguments::new();
        args.insert("recall".into(), "quiet".into());
        assert!(recall.invoke(&args).await.unwrap().contains("quiet hotels"));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let recall = MemoryRecall::new(Arc::new(InMemoryStore::new()), "u");
        let mut args = ToolArguments::new();
        args.insert("action".into(), "delete".into());
        assert!(recall.invoke(&args).await.is_err());
    }
}
