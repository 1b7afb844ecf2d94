//! Capability interface.
//!
//! A capability is a named external operation a unit may ask for from
//! inside a completion. It receives a flat map of textual arguments and
//! answers with text. Failures are ordinary `anyhow` errors; the engine
//! folds them back into the conversation as text.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

/// Textual arguments of one capability call.
pub type ToolArguments = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Capability: Send + Sync + fmt::Debug {
    /// Unique name used in call tokens.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Key that receives a bare, `=`-free argument string.
    ///
    /// Search-style capabilities take a `query`, everything else an `input`.
    fn default_argument_key(&self) -> &str {
        if self.name().to_lowercase().contains("search") {
            "query"
        } else {
            "input"
        }
    }

    /// Arguments for a bare argument string.
    fn bare_arguments(&self, raw: &str) -> ToolArguments {
        let mut args = ToolArguments::new();
        args.insert(self.default_argument_key().to_string(), raw.to_string());
        args
    }

    async fn invoke(&self, args: &ToolArguments) -> anyhow::Result<String>;
}

// ---------------------------------------------------------------------------
// FnCapability
// ---------------------------------------------------------------------------

/// Synchronous capability body.
pub type CapabilityFn = Arc<dyn Fn(&ToolArguments) -> anyhow::Result<String> + Send + Sync>;

/// Capability wrapping a plain function.
#[derive(Clone)]
pub struct FnCapability {
    name: String,
    description: String,
    default_key: Option<String>,
    func: CapabilityFn,
    usage_count: Arc<AtomicU32>,
}

impl fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("usage_count", &self.usage_count())
            .finish()
    }
}

impl FnCapability {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ToolArguments) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            default_key: None,
            func: Arc::new(func),
            usage_count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Override the key used for bare argument strings.
    pub fn with_default_key(mut self, key: impl Into<String>) -> Self {
        self.default_key = Some(key.into());
        self
    }

    /// Number of invocations so far, failed ones included.
    pub fn usage_count(&self) -> u32 {
        self.usage_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn default_argument_key(&self) -> &str {
        match &self.default_key {
            Some(key) => key,
            None if self.name.to_lowercase().contains("search") => "query",
            None => "input",
        }
    }

    async fn invoke(&self, args: &ToolArguments) -> anyhow::Result<String> {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        (self.func)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_argument_key_by_name() {
        let search = FnCapability::new("poi_search", "", |_| Ok(String::new()));
        let weather = FnCapability::new("weather", "", |_| Ok(String::new()));
        let custom = FnCapability::new("weather", "", |_| Ok(String::new())).with_default_key("city");
        assert_eq!(search.default_argument_key(), "query");
        assert_eq!(weather.default_argument_key(), "input");
        assert_eq!(custom.default_argument_key(), "city");
        assert_eq!(custom.bare_arguments("Beijing")["city"], "Beijing");
    }

    #[tokio::test]
    async fn test_invoke_counts_usage() {
        let cap = FnCapability::new("echo", "echo input", |args| {
            Ok(args.get("input").cloned().unwrap_or_default())
        });
        let mut args = ToolArguments::new();
        args.insert("input".into(), "hi".into());
        assert_eq!(cap.invoke(&args).await.unwrap(), "hi");
        assert_eq!(cap.usage_count(), 1);
    }

    #[test]
    fn test_invoke_error_is_returned() {
        let cap = FnCapability::new("broken", "", |_| anyhow::bail!("service down"));
        let err = tokio_test::block_on(cap.invoke(&ToolArguments::new())).unwrap_err();
        assert_eq!(err.to_string(), "service down");
        assert_eq!(cap.usage_count(), 1);
    }
}
