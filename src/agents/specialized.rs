//! Specialist units layered on the protocol engine.
//!
//! Each unit wraps a [`ProtocolEngine`] and adds a thin policy: how it
//! enriches its input from the blackboard before running, what it
//! publishes afterwards, and how it answers hub messages.
//!
//! | Role | Reads | Publishes | Answers |
//! |------|-------|-----------|---------|
//! | Attraction | `request` preferences | `attraction_locations`, Suggestion to lodging | Request `search_attractions` / `provide_attractions` |
//! | Lodging | `attraction_locations` | `hotel_recommendations` | Request `provide_hotels`, Suggestion |
//! | Weather | `request` dates | `weather_info` | |
//! | Synthesis | everything shared | `trip_planning` memory | Negotiation (agrees) |

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::executor::{preview, EngineError, ProtocolEngine, RunOutcome};
use super::prompts;
use crate::hub::{Hub, HubError, Message, MessageHandler, MessageKind, UnitHandle};
use crate::memory::MemoryStore;

pub const ATTRACTION_UNIT: &str = "attraction_search";
pub const LODGING_UNIT: &str = "hotel_recommendation";
pub const WEATHER_UNIT: &str = "weather_query";
pub const SYNTHESIS_UNIT: &str = "trip_planner";

pub const REQUEST_KEY: &str = "request";
pub const ATTRACTIONS_KEY: &str = "attraction_locations";
pub const HOTELS_KEY: &str = "hotel_recommendations";
pub const WEATHER_KEY: &str = "weather_info";

/// Longest excerpt of a unit's output published for other units.
const SHARE_PREVIEW: usize = 500;
/// Longest excerpt quoted into another unit's input.
const INPUT_PREVIEW: usize = 200;

// ---------------------------------------------------------------------------
// UnitRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    Attraction,
    Lodging,
    Weather,
    Synthesis,
}

impl UnitRole {
    pub const ALL: [UnitRole; 4] = [
        UnitRole::Attraction,
        UnitRole::Lodging,
        UnitRole::Weather,
        UnitRole::Synthesis,
    ];

    /// Name the unit registers under.
    pub fn unit_name(&self) -> &'static str {
        match self {
            UnitRole::Attraction => ATTRACTION_UNIT,
            UnitRole::Lodging => LODGING_UNIT,
            UnitRole::Weather => WEATHER_UNIT,
            UnitRole::Synthesis => SYNTHESIS_UNIT,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            UnitRole::Attraction => prompts::ATTRACTION_PROMPT,
            UnitRole::Lodging => prompts::LODGING_PROMPT,
            UnitRole::Weather => prompts::WEATHER_PROMPT,
            UnitRole::Synthesis => prompts::SYNTHESIS_PROMPT,
        }
    }

    /// Whether the unit calls capabilities at all.
    pub fn uses_tools(&self) -> bool {
        !matches!(self, UnitRole::Synthesis)
    }
}

// ---------------------------------------------------------------------------
// SpecialistUnit
// ---------------------------------------------------------------------------

/// A protocol engine plus its role policy.
pub struct SpecialistUnit {
    role: UnitRole,
    engine: ProtocolEngine,
    memory: Option<Arc<dyn MemoryStore>>,
    user_id: Option<String>,
}

impl fmt::Debug for SpecialistUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecialistUnit")
            .field("role", &self.role)
            .field("engine", &self.engine)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl SpecialistUnit {
    pub fn new(role: UnitRole, engine: ProtocolEngine) -> Self {
        Self {
            role,
            engine,
            memory: None,
            user_id: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>, user_id: Option<String>) -> Self {
        self.memory = Some(memory);
        self.user_id = user_id;
        self
    }

    pub fn role(&self) -> UnitRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Register this unit on `hub` with a generic handler.
    ///
    /// The hub keeps only a weak reference; once the unit is dropped its
    /// messages go unanswered.
    pub fn attach(self: &Arc<Self>, hub: &Hub) -> Result<(), HubError> {
        let handler: Arc<dyn MessageHandler> = Arc::new(UnitMessageHandler {
            unit: Arc::downgrade(self),
        });
        hub.register(self.name(), UnitHandle::new().with_generic(handler))
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Enrich `input`, run the engine, publish the result.
    pub async fn run(&self, input: &str) -> Result<RunOutcome, EngineError> {
        let input = self.prepare_input(input).await;
        let outcome = self.engine.run(&input).await?;
        self.publish(&outcome.output).await;
        Ok(outcome)
    }

    fn shared(&self, key: &str) -> Option<Value> {
        self.engine.blackboard().and_then(|bb| bb.get_shared(key))
    }

    async fn prepare_input(&self, input: &str) -> String {
        match self.role {
            UnitRole::Attraction => {
                let preferences = self
                    .shared(REQUEST_KEY)
                    .map(|r| string_list(&r["preferences"]))
                    .unwrap_or_default();
                let top: Vec<&str> = preferences.iter().take(2).map(String::as_str).collect();
                if top.is_empty() || top.iter().all(|p| input.contains(p)) {
                    input.to_string()
                } else {
                    format!("{}. Prefer attractions related to: {}", input, top.join(", "))
                }
            }
            UnitRole::Lodging => match self.shared(ATTRACTIONS_KEY) {
                Some(locations) => format!(
                    "{}. Attraction locations for reference: {}",
                    input,
                    preview(&text_of(&locations), INPUT_PREVIEW)
                ),
                None => input.to_string(),
            },
            UnitRole::Weather => {
                let request = self.shared(REQUEST_KEY).unwrap_or(Value::Null);
                match (request["start_date"].as_str(), request["end_date"].as_str()) {
                    (Some(start), Some(end)) => format!("{}. Date range: {} to {}", input, start, end),
                    _ => input.to_string(),
                }
            }
            UnitRole::Synthesis => {
                self.fill_missing_context().await;
                input.to_string()
            }
        }
    }

    /// Ask peers for the attraction and hotel data that nobody shared yet.
    async fn fill_missing_context(&self) {
        let Some(bb) = self.engine.blackboard() else {
            return;
        };
        let wanted = [
            (ATTRACTIONS_KEY, ATTRACTION_UNIT, "provide_attractions"),
            (HOTELS_KEY, LODGING_UNIT, "provide_hotels"),
        ];
        for (key, peer, action) in wanted {
            if bb.has_shared(key) {
                continue;
            }
            log::warn!("{} is missing {}, asking {}", self.name(), key, peer);
            let reply = self
                .engine
                .send_to(peer, MessageKind::Request, json!({ "action": action }))
                .await;
            if let Some(result) = reply.as_ref().and_then(|r| r.get("result")).filter(|r| !r.is_null()) {
                bb.share(key, result.clone(), Some(peer));
            }
        }
    }

    async fn publish(&self, output: &str) {
        let excerpt = preview(output, SHARE_PREVIEW);
        match self.role {
            UnitRole::Attraction => {
                if let Some(bb) = self.engine.blackboard() {
                    bb.share(ATTRACTIONS_KEY, json!(excerpt), Some(self.name()));
                }
                if self.engine.hub().is_some() {
                    self.engine
                        .send_to(
                            LODGING_UNIT,
                            MessageKind::Suggestion,
                            json!({"message": "attraction search finished", "attraction_info": excerpt}),
                        )
                        .await;
                }
            }
            UnitRole::Lodging => {
                if let Some(bb) = self.engine.blackboard() {
                    bb.share(HOTELS_KEY, json!(excerpt), Some(self.name()));
                }
            }
            UnitRole::Weather => {
                if let Some(bb) = self.engine.blackboard() {
                    bb.share(WEATHER_KEY, json!(excerpt), Some(self.name()));
                }
            }
            UnitRole::Synthesis => self.remember_plan(output).await,
        }
    }

    async fn remember_plan(&self, output: &str) {
        let (Some(memory), Some(user_id)) = (&self.memory, &self.user_id) else {
            return;
        };
        let Some(request) = self.shared(REQUEST_KEY) else {
            return;
        };
        let record = json!({
            "preference_type": "trip_planning",
            "destination": request["destination"],
            "preferences": request["preferences"],
            "trip_result": preview(output, INPUT_PREVIEW),
        });
        if let Err(e) = memory.store(user_id, "trip_planning", record).await {
            log::warn!("Failed to store trip memory for {}: {:#}", user_id, e);
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Answer a hub message addressed to this unit.
    pub async fn handle_message(&self, message: &Message) -> Value {
        let payload = message.payload();
        let action = payload.get("action").and_then(Value::as_str);

        match (self.role, message.kind(), action) {
            (UnitRole::Attraction, MessageKind::Request, Some("search_attractions")) => {
                let query = payload.get("query").and_then(Value::as_str).unwrap_or("");
                match self.run(query).await {
                    Ok(outcome) => json!({"status": "success", "result": outcome.output}),
                    Err(e) => json!({"status": "error", "error": e.to_string()}),
                }
            }
            (UnitRole::Attraction, MessageKind::Request, Some("provide_attractions")) => {
                self.provide(ATTRACTIONS_KEY)
            }
            (UnitRole::Lodging, MessageKind::Request, Some("provide_hotels")) => self.provide(HOTELS_KEY),
            (UnitRole::Lodging, MessageKind::Suggestion, _) if payload.get("attraction_info").is_some() => {
                log::info!("{} received attraction info from {}", self.name(), message.sender());
                self.received(message)
            }
            (UnitRole::Synthesis, MessageKind::Negotiation, _) => {
                json!({"status": "agree", "agreement": true, "feedback": {}})
            }
            _ => self.received(message),
        }
    }

    fn provide(&self, key: &str) -> Value {
        match self.shared(key) {
            Some(value) => json!({"status": "success", "result": value}),
            None => json!({"status": "unavailable", "result": null}),
        }
    }

    fn received(&self, message: &Message) -> Value {
        json!({
            "status": "received",
            "agent": self.name(),
            "message_type": message.kind(),
        })
    }
}

struct UnitMessageHandler {
    unit: Weak<SpecialistUnit>,
}

#[async_trait]
impl MessageHandler for UnitMessageHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Value>> {
        match self.unit.upgrade() {
            Some(unit) => Ok(Some(unit.handle_message(message).await)),
            None => Ok(None),
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
