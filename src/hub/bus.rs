//! The [`Hub`] itself: registration, point-to-point send and broadcast.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::handler::{MessageHandler, UnitHandle};
use super::message::{Message, MessageKind};
use super::HubError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Hub tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Upper bound on a single handler call. `None` waits forever.
    #[serde(default, with = "crate::config::opt_secs")]
    pub handler_timeout: Option<Duration>,
    /// Maximum negotiation rounds.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Deadline for collecting all replies of one negotiation round.
    #[serde(default, with = "crate::config::opt_secs")]
    pub round_timeout: Option<Duration>,
}

fn default_max_rounds() -> u32 {
    3
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            handler_timeout: None,
            max_rounds: default_max_rounds(),
            round_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    /// Registration order; broadcast walks this.
    order: Vec<String>,
    handles: HashMap<String, UnitHandle>,
}

enum Route {
    UnknownReceiver,
    NoHandler,
    Handler(Arc<dyn MessageHandler>),
}

/// One non-empty reply collected by [`Hub::broadcast`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastReply {
    pub unit: String,
    pub response: Value,
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Message hub shared by the units of one coordination session.
pub struct Hub {
    config: HubConfig,
    registry: Mutex<Registry>,
    log: Mutex<Vec<Message>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("units", &self.registry.lock().order)
            .field("logged_messages", &self.log.lock().len())
            .finish()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Bind `name` to `handle`.
    ///
    /// # Errors
    ///
    /// [`HubError::AlreadyRegistered`] if the name is taken. The existing
    /// handle is left as it was.
    pub fn register(&self, name: impl Into<String>, handle: UnitHandle) -> Result<(), HubError> {
        let name = name.into();
        let mut registry = self.registry.lock();
        if registry.handles.contains_key(&name) {
            log::warn!("Rejected duplicate unit registration: {}", name);
            return Err(HubError::AlreadyRegistered(name));
        }
        log::info!("Unit registered: {}", name);
        registry.order.push(name.clone());
        registry.handles.insert(name, handle);
        Ok(())
    }

    /// Set the handler for `(name, kind)`, replacing any previous one.
    pub fn register_handler(
        &self,
        name: &str,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), HubError> {
        let mut registry = self.registry.lock();
        let handle = registry
            .handles
            .get_mut(name)
            .ok_or_else(|| HubError::UnknownUnit(name.to_string()))?;
        handle.set_handler(kind, handler);
        log::debug!("Handler registered - unit: {}, kind: {}", name, kind);
        Ok(())
    }

    /// Remove a unit. Returns its handle if it was registered.
    pub fn unregister(&self, name: &str) -> Option<UnitHandle> {
        let mut registry = self.registry.lock();
        registry.order.retain(|n| n != name);
        registry.handles.remove(name)
    }

    /// Names of registered units in registration order.
    pub fn registered_units(&self) -> Vec<String> {
        self.registry.lock().order.clone()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.lock().handles.contains_key(name)
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn route(&self, receiver: &str, kind: MessageKind) -> Route {
        let registry = self.registry.lock();
        match registry.handles.get(receiver) {
            None => Route::UnknownReceiver,
            Some(handle) => match handle.resolve(kind) {
                Some(handler) => Route::Handler(handler),
                None => Route::NoHandler,
            },
        }
    }

    /// Deliver `message` and return the receiver's response, if any.
    ///
    /// The message is logged before routing, so it shows up in the history
    /// even when nobody answers.
    pub async fn send(&self, message: Message) -> Option<Value> {
        self.log.lock().push(message.clone());

        let handler = match self.route(message.receiver(), message.kind()) {
            Route::Handler(handler) => handler,
            Route::UnknownReceiver => {
                log::warn!("Receiver not registered: {}", message.receiver());
                return None;
            }
            Route::NoHandler => {
                log::warn!(
                    "No handler - receiver: {}, kind: {}",
                    message.receiver(),
                    message.kind()
                );
                return None;
            }
        };

        let response = self.invoke(handler, &message).await;
        log::debug!(
            "Message handled - from: {}, to: {}, kind: {}, answered: {}",
            message.sender(),
            message.receiver(),
            message.kind(),
            response.is_some()
        );
        response
    }

    async fn invoke(&self, handler: Arc<dyn MessageHandler>, message: &Message) -> Option<Value> {
        let call = AssertUnwindSafe(handler.handle(message)).catch_unwind();
        let outcome = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!(
                        "Handler timed out after {:?} - receiver: {}",
                        limit,
                        message.receiver()
                    );
                    return None;
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                log::error!("Handler failed - receiver: {}: {:#}", message.receiver(), e);
                None
            }
            Err(_) => {
                log::error!("Handler panicked - receiver: {}", message.receiver());
                None
            }
        }
    }

    /// Send one message per registered unit, skipping `sender` and
    /// `exclude`, in registration order. Only non-empty replies are kept.
    pub async fn broadcast(
        &self,
        sender: &str,
        kind: MessageKind,
        payload: Value,
        exclude: &[&str],
    ) -> Vec<BroadcastReply> {
        let targets: Vec<String> = self
            .registered_units()
            .into_iter()
            .filter(|name| name != sender && !exclude.contains(&name.as_str()))
            .collect();

        let mut replies = Vec::new();
        for target in targets {
            let message = Message::new(sender, target.clone(), kind, payload.clone());
            if let Some(response) = self.send(message).await {
                if is_meaningful(&response) {
                    replies.push(BroadcastReply {
                        unit: target,
                        response,
                    });
                }
            }
        }
        replies
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Logged messages matching every given filter, in send order.
    pub fn get_message_history(&self, unit: Option<&str>, kind: Option<MessageKind>) -> Vec<Message> {
        self.log
            .lock()
            .iter()
            .filter(|m| unit.map_or(true, |u| m.involves(u)))
            .filter(|m| kind.map_or(true, |k| m.kind() == k))
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn clear_history(&self) {
        self.log.lock().clear();
    }
}

/// Null, empty strings, empty arrays and empty objects count as no reply.
pub(crate) fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::handler::handler_fn;
    use serde_json::json;

    fn echo(tag: &'static str) -> Arc<dyn MessageHandler> {
        handler_fn(move |_| Ok(Some(json!({ "from": tag }))))
    }

    #[tokio::test]
    async fn test_send_uses_typed_handler() {
        let hub = Hub::default();
        hub.register(
            "lodging",
            UnitHandle::new()
                .with_generic(echo("generic"))
                .with_handler(MessageKind::Query, echo("typed")),
        )
        .unwrap();

        let reply = hub
            .send(Message::new("planner", "lodging", MessageKind::Query, json!({})))
            .await;
        assert_eq!(reply, Some(json!({"from": "typed"})));
    }

    #[tokio::test]
    async fn test_send_falls_back_to_generic() {
        let hub = Hub::default();
        hub.register("lodging", UnitHandle::new().with_generic(echo("generic")))
            .unwrap();

        let reply = hub
            .send(Message::new("planner", "lodging", MessageKind::Feedback, json!({})))
            .await;
        assert_eq!(reply, Some(json!({"from": "generic"})));
    }

    #[tokio::test]
    async fn test_send_without_handler_still_logs() {
        let hub = Hub::default();
        hub.register("lodging", UnitHandle::new()).unwrap();

        let reply = hub
            .send(Message::new("planner", "lodging", MessageKind::Query, json!({})))
            .await;
        assert!(reply.is_none());
        assert_eq!(hub.get_message_history(Some("lodging"), None).len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_unknown_receiver() {
        let hub = Hub::default();
        let reply = hub
            .send(Message::new("planner", "ghost", MessageKind::Request, json!({})))
            .await;
        assert!(reply.is_none());
        assert_eq!(hub.history_len(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_become_no_response() {
        let hub = Hub::default();
        hub.register(
            "flaky",
            UnitHandle::new()
                .with_handler(MessageKind::Query, handler_fn(|_| Err(anyhow::anyhow!("boom"))))
                .with_handler(MessageKind::Request, handler_fn(|_| panic!("handler bug"))),
        )
        .unwrap();

        let q = hub
            .send(Message::new("a", "flaky", MessageKind::Query, json!({})))
            .await;
        let r = hub
            .send(Message::new("a", "flaky", MessageKind::Request, json!({})))
            .await;
        assert!(q.is_none());
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        struct Slow;
        #[async_trait::async_trait]
        impl MessageHandler for Slow {
            async fn handle(&self, _m: &Message) -> anyhow::Result<Option<Value>> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Some(json!({"late": true})))
            }
        }

        let hub = Hub::new(HubConfig {
            handler_timeout: Some(Duration::from_millis(20)),
            ..HubConfig::default()
        });
        hub.register("slow", UnitHandle::new().with_generic(Arc::new(Slow)))
            .unwrap();
        let reply = hub
            .send(Message::new("a", "slow", MessageKind::Query, json!({})))
            .await;
        assert!(reply.is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let hub = Hub::default();
        hub.register("a", UnitHandle::new()).unwrap();
        let err = hub.register("a", UnitHandle::new()).unwrap_err();
        assert_eq!(err, HubError::AlreadyRegistered("a".into()));
        assert_eq!(hub.registered_units(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_register_handler_replaces() {
        let hub = Hub::default();
        hub.register("a", UnitHandle::new()).unwrap();
        hub.register_handler("a", MessageKind::Query, echo("first")).unwrap();
        hub.register_handler("a", MessageKind::Query, echo("second")).unwrap();

        let reply = hub
            .send(Message::new("b", "a", MessageKind::Query, json!({})))
            .await;
        assert_eq!(reply, Some(json!({"from": "second"})));

        let err = hub
            .register_handler("missing", MessageKind::Query, echo("x"))
            .unwrap_err();
        assert_eq!(err, HubError::UnknownUnit("missing".into()));
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_excluded() {
        let hub = Hub::default();
        for name in ["a", "b", "c", "d"] {
            hub.register(name, UnitHandle::new().with_generic(echo(name)))
                .unwrap();
        }

        let replies = hub
            .broadcast("a", MessageKind::Suggestion, json!({"hint": 1}), &["c", "zz"])
            .await;
        let units: Vec<&str> = replies.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(units, vec!["b", "d"]);

        // registered - 1 - |exclude ∩ registered| = 4 - 1 - 1
        let sent = hub.get_message_history(Some("a"), Some(MessageKind::Suggestion));
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.receiver() != "a" && m.receiver() != "c"));
    }

    #[tokio::test]
    async fn test_broadcast_drops_empty_replies() {
        let hub = Hub::default();
        hub.register("a", UnitHandle::new()).unwrap();
        hub.register("quiet", UnitHandle::new().with_generic(handler_fn(|_| Ok(Some(json!({}))))))
            .unwrap();
        hub.register("loud", UnitHandle::new().with_generic(echo("loud")))
            .unwrap();

        let replies = hub.broadcast("a", MessageKind::Query, json!({}), &[]).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].unit, "loud");
    }

    #[tokio::test]
    async fn test_history_filters_combine() {
        let hub = Hub::default();
        hub.register("a", UnitHandle::new()).unwrap();
        hub.register("b", UnitHandle::new()).unwrap();

        hub.send(Message::new("a", "b", MessageKind::Query, json!({}))).await;
        hub.send(Message::new("b", "a", MessageKind::Result, json!({}))).await;
        hub.send(Message::new("c", "b", MessageKind::Query, json!({}))).await;

        assert_eq!(hub.get_message_history(None, None).len(), 3);
        assert_eq!(hub.get_message_history(Some("a"), None).len(), 2);
        assert_eq!(hub.get_message_history(None, Some(MessageKind::Query)).len(), 2);
        assert_eq!(
            hub.get_message_history(Some("a"), Some(MessageKind::Query)).len(),
            1
        );

        hub.clear_history();
        assert_eq!(hub.history_len(), 0);
    }

    #[tokio::test]
    async fn test_handler_can_reenter_hub() {
        let hub = Arc::new(Hub::default());
        hub.register("leaf", UnitHandle::new().with_generic(echo("leaf")))
            .unwrap();

        struct Relay(std::sync::Weak<Hub>);
        #[async_trait::async_trait]
        impl MessageHandler for Relay {
            async fn handle(&self, m: &Message) -> anyhow::Result<Option<Value>> {
                let hub = self.0.upgrade().ok_or_else(|| anyhow::anyhow!("hub gone"))?;
                Ok(hub
                    .send(Message::new(m.receiver(), "leaf", MessageKind::Query, json!({})))
                    .await)
            }
        }
        hub.register("relay", UnitHandle::new().with_generic(Arc::new(Relay(Arc::downgrade(&hub)))))
            .unwrap();

        let reply = hub
            .send(Message::new("root", "relay", MessageKind::Request, json!({})))
            .await;
        assert_eq!(reply, Some(json!({"from": "leaf"})));
        assert_eq!(hub.history_len(), 2);
    }
}
