//! Message handlers and the per-unit handle stored in the hub registry.
//!
//! Dispatch is a two-level lookup: a typed handler keyed by
//! [`MessageKind`], then one optional generic handler per unit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::message::{Message, MessageKind};

// ---------------------------------------------------------------------------
// MessageHandler
// ---------------------------------------------------------------------------

/// Something that can answer a [`Message`].
///
/// `Ok(None)` means "no response". Errors and panics are caught by the hub
/// and also become "no response" for the sender.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Value>>;
}

/// Adapter turning a synchronous closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Message) -> anyhow::Result<Option<Value>> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Value>> {
        (self.func)(message)
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(func: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&Message) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(FnHandler { func })
}

// ---------------------------------------------------------------------------
// UnitHandle
// ---------------------------------------------------------------------------

/// Handlers bound to one registered unit name.
#[derive(Clone, Default)]
pub struct UnitHandle {
    typed: HashMap<MessageKind, Arc<dyn MessageHandler>>,
    generic: Option<Arc<dyn MessageHandler>>,
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.typed.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("UnitHandle")
            .field("typed", &kinds)
            .field("generic", &self.generic.is_some())
            .finish()
    }
}

impl UnitHandle {
    /// A handle with no handlers; messages to it get no response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the generic fallback handler.
    pub fn with_generic(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.generic = Some(handler);
        self
    }

    /// Builder: set the handler for one kind.
    pub fn with_handler(mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> Self {
        self.typed.insert(kind, handler);
        self
    }

    pub(crate) fn set_handler(&mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.typed.insert(kind, handler);
    }

    /// Resolve the handler for `kind`: typed first, then generic.
    pub fn resolve(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.typed
            .get(&kind)
            .cloned()
            .or_else(|| self.generic.clone())
    }

    pub fn has_generic(&self) -> bool {
        self.generic.is_some()
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.typed.contains_key(&kind)
    }
}
