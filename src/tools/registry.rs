//! Name-indexed dispatch table of capabilities.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::base_tool::Capability;

/// Capabilities a unit may call, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Capability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool`, replacing any capability with the same name.
    pub fn register(&mut self, tool: Arc<dyn Capability>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            log::warn!("Capability {} replaced", name);
        }
    }

    pub fn with(mut self, tool: Arc<dyn Capability>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One `- name: description` line per capability.
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::base_tool::FnCapability;

    fn cap(name: &str, description: &str) -> Arc<dyn Capability> {
        Arc::new(FnCapability::new(name, description, |_| Ok(String::new())))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ToolRegistry::new()
            .with(cap("weather", "forecast"))
            .with(cap("poi_search", "points of interest"));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("weather").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names(), vec!["poi_search", "weather"]);
    }

    #[test]
    fn test_describe_lists_every_tool() {
        let registry = ToolRegistry::new().with(cap("a", "first")).with(cap("b", "second"));
        assert_eq!(registry.describe(), "- a: first\n- b: second");
        assert_eq!(ToolRegistry::new().describe(), "");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(cap("a", "old"));
        registry.register(cap("a", "new"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().description(), "new");
    }
}
