//! Trip orchestrator — sequences the specialist units and validates the plan.
//!
//! One request gets one session: a fresh blackboard from the store, a fresh
//! hub, and four units bound to both. Stages run strictly in order
//! (attraction, lodging, weather, synthesis), each stage's full output being
//! quoted into the next stage's input. The synthesis output is parsed as a
//! [`TripPlan`] and geofenced against the destination. When an image lookup
//! is configured, attractions left without photos get one; lookup failures
//! only cost the photo.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::geofence::{validate_plan, DestinationBounds, ValidationReport};
use super::model::{TripPlan, TripRequest};
use super::prompts;
use crate::agents::executor::{EngineConfig, EngineError, ProtocolEngine};
use crate::agents::specialized::{SpecialistUnit, UnitRole, REQUEST_KEY, SYNTHESIS_UNIT};
use crate::blackboard::{Blackboard, BlackboardStore};
use crate::config::PlannerConfig;
use crate::hub::{Hub, HubError};
use crate::llms::{Completion, CompletionError, CompletionOptions, OpenAiCompatible};
use crate::memory::{InMemoryStore, MemoryRecall, MemoryStore};
use crate::tools::{AmapClient, AmapTextSearch, AmapWeather, ImageLookup, ToolRegistry, UnsplashClient};

/// Name the orchestrator uses as a message sender.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Memory records seeded into a session.
const MEMORY_SEED_LIMIT: usize = 5;

// ---------------------------------------------------------------------------
// Errors & outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("synthesis returned an empty completion")]
    EmptyCompletion,

    #[error("synthesis output is not a valid plan: {0}")]
    InvalidPlan(String),

    #[error("coordination error: {0}")]
    Coordination(#[from] HubError),

    #[error("setup failed: {0}")]
    Setup(String),
}

impl From<CompletionError> for PlanningError {
    fn from(e: CompletionError) -> Self {
        PlanningError::Setup(e.to_string())
    }
}

/// A validated plan and what validation changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub session_id: String,
    pub plan: TripPlan,
    pub report: ValidationReport,
}

/// Raw output of every stage, in pipeline order.
#[derive(Debug, Clone, Default)]
struct StageOutputs {
    attractions: String,
    hotels: String,
    weather: String,
    synthesis: String,
}

// ---------------------------------------------------------------------------
// TripOrchestrator
// ---------------------------------------------------------------------------

pub struct TripOrchestrator {
    completion: Arc<dyn Completion>,
    tools: ToolRegistry,
    memory: Option<Arc<dyn MemoryStore>>,
    images: Option<Arc<dyn ImageLookup>>,
    boards: Arc<BlackboardStore>,
    bounds: DestinationBounds,
    config: PlannerConfig,
}

impl std::fmt::Debug for TripOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripOrchestrator")
            .field("model", &self.completion.model())
            .field("tools", &self.tools.names())
            .field("sessions", &self.boards.len())
            .finish()
    }
}

impl TripOrchestrator {
    pub fn new(completion: Arc<dyn Completion>, tools: ToolRegistry, config: PlannerConfig) -> Self {
        let bounds = DestinationBounds::with_entries(&config.destinations);
        Self {
            completion,
            tools,
            memory: None,
            images: None,
            boards: Arc::new(BlackboardStore::new()),
            bounds,
            config,
        }
    }

    /// Orchestrator wired to the configured endpoint, AMap, an in-process
    /// memory store and, when a key is set, Unsplash photos.
    pub fn from_config(config: PlannerConfig) -> Result<Self, PlanningError> {
        let completion = OpenAiCompatible::from_settings(&config.llm)?;
        let amap = AmapClient::from_settings(&config.amap).map_err(|e| PlanningError::Setup(format!("{:#}", e)))?;
        if config.amap.api_key.is_none() {
            log::warn!("AMAP_API_KEY not set; map lookups will fail");
        }
        let tools = ToolRegistry::new()
            .with(Arc::new(AmapTextSearch::new(amap.clone())))
            .with(Arc::new(AmapWeather::new(amap)));
        let photos = match config.unsplash.access_key {
            Some(_) => Some(
                UnsplashClient::from_settings(&config.unsplash).map_err(|e| PlanningError::Setup(format!("{:#}", e)))?,
            ),
            None => None,
        };

        let mut planner = Self::new(Arc::new(completion), tools, config).with_memory(Arc::new(InMemoryStore::new()));
        if let Some(photos) = photos {
            planner = planner.with_image_lookup(Arc::new(photos));
        }
        Ok(planner)
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_image_lookup(mut self, images: Arc<dyn ImageLookup>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_store(mut self, boards: Arc<BlackboardStore>) -> Self {
        self.boards = boards;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn boards(&self) -> &Arc<BlackboardStore> {
        &self.boards
    }

    pub fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.memory.as_ref()
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Run the full pipeline for `request`.
    pub async fn plan(&self, request: &TripRequest) -> Result<PlanOutcome, PlanningError> {
        validate_request(request)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Planning trip - session: {}, destination: {}, dates: {} to {}",
            session_id,
            request.destination,
            request.start_date,
            request.end_date
        );

        let board = self.boards.create(&session_id);
        let result = self.run_session(request, &board).await;
        if self.config.retain_sessions {
            self.boards.retain_latest(self.config.max_retained_sessions);
        } else {
            self.boards.remove(&session_id);
        }

        let (plan, report) = result?;
        log::info!(
            "Plan ready - session: {}, title: {}, removed: {}, warnings: {}",
            session_id,
            plan.trip_title,
            report.removed,
            report.warnings.len()
        );
        Ok(PlanOutcome {
            session_id,
            plan,
            report,
        })
    }

    async fn run_session(
        &self,
        request: &TripRequest,
        board: &Arc<Blackboard>,
    ) -> Result<(TripPlan, ValidationReport), PlanningError> {
        board.share(REQUEST_KEY, json!(request), Some(ORCHESTRATOR));
        self.seed_memory(request, board).await;

        let hub = Arc::new(Hub::new(self.config.hub.clone()));
        let units = self.build_units(request, &hub, board)?;
        let outputs = self.run_stages(request, &units, &hub, board).await?;

        let mut plan = parse_plan(&outputs.synthesis)?;
        let bbox = self.bounds.lookup(&request.destination);
        if bbox.is_none() {
            log::warn!("No bounds known for {}; accepting any coordinates", request.destination);
        }
        let report = validate_plan(&mut plan, bbox.as_ref());
        board.share("geofence_report", json!(report), Some(ORCHESTRATOR));
        self.attach_images(request, &mut plan).await;
        Ok((plan, report))
    }

    /// Give each attraction without photos one looked-up photo.
    async fn attach_images(&self, request: &TripRequest, plan: &mut TripPlan) {
        let Some(images) = &self.images else {
            return;
        };
        let mut added = 0;
        for attraction in plan.days.iter_mut().flat_map(|d| d.attractions.iter_mut()) {
            if !attraction.image_urls.is_empty() {
                continue;
            }
            let query = format!("{} {} landmark tourist attraction", attraction.name, request.destination);
            match images.photo_url(&query).await {
                Ok(Some(url)) => {
                    attraction.image_urls.push(url);
                    added += 1;
                }
                Ok(None) => log::debug!("No photo found for {}", attraction.name),
                Err(e) => log::warn!("Photo lookup failed for {}: {:#}", attraction.name, e),
            }
        }
        log::debug!("Attached {} photo(s)", added);
    }

    async fn seed_memory(&self, request: &TripRequest, board: &Blackboard) {
        let (Some(memory), Some(user_id)) = (&self.memory, &request.user_id) else {
            return;
        };
        let query = std::iter::once(request.destination.as_str())
            .chain(request.preferences.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        match memory.retrieve(user_id, &query, MEMORY_SEED_LIMIT, None).await {
            Ok(records) => {
                let mut by_kind: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for record in records {
                    by_kind.entry(record.kind).or_default().push(record.payload);
                }
                for (kind, payloads) in by_kind {
                    board.add_memory_context(&kind, Value::Array(payloads));
                }
            }
            Err(e) => log::warn!("Memory lookup failed for {}: {:#}", user_id, e),
        }
    }

    fn engine_config(&self, role: UnitRole) -> EngineConfig {
        let llm = &self.config.llm;
        let mut options = CompletionOptions::default().with_temperature(llm.temperature);
        if let Some(max_tokens) = llm.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        EngineConfig {
            max_iterations: if role.uses_tools() {
                self.config.units.max_tool_iterations
            } else {
                0
            },
            completion_timeout: llm.timeout,
            tool_timeout: self.config.units.tool_timeout,
            stream: llm.stream,
            options,
        }
    }

    fn build_units(
        &self,
        request: &TripRequest,
        hub: &Arc<Hub>,
        board: &Arc<Blackboard>,
    ) -> Result<BTreeMap<&'static str, Arc<SpecialistUnit>>, PlanningError> {
        let mut tools = self.tools.clone();
        if let (Some(memory), Some(user_id)) = (&self.memory, &request.user_id) {
            tools.register(Arc::new(MemoryRecall::new(Arc::clone(memory), user_id.clone())));
        }

        let mut units = BTreeMap::new();
        for role in UnitRole::ALL {
            let mut engine = ProtocolEngine::new(role.unit_name(), Arc::clone(&self.completion))
                .with_system_prompt(role.system_prompt())
                .with_config(self.engine_config(role))
                .with_hub(Arc::clone(hub))
                .with_blackboard(Arc::clone(board));
            if role.uses_tools() {
                engine = engine.with_tools(tools.clone());
            }

            let mut unit = SpecialistUnit::new(role, engine);
            if let Some(memory) = &self.memory {
                unit = unit.with_memory(Arc::clone(memory), request.user_id.clone());
            }
            let unit = Arc::new(unit);
            unit.attach(hub)?;
            units.insert(role.unit_name(), unit);
        }
        Ok(units)
    }

    async fn run_stages(
        &self,
        request: &TripRequest,
        units: &BTreeMap<&'static str, Arc<SpecialistUnit>>,
        hub: &Hub,
        board: &Blackboard,
    ) -> Result<StageOutputs, PlanningError> {
        let mut outputs = StageOutputs::default();

        outputs.attractions = run_stage(units, UnitRole::Attraction, &prompts::attraction_query(request)).await?;
        outputs.hotels = run_stage(units, UnitRole::Lodging, &prompts::lodging_query(request, &outputs.attractions)).await?;
        outputs.weather = run_stage(units, UnitRole::Weather, &prompts::weather_query(request, &outputs.hotels)).await?;

        let agreement = self.agree_on_budget(request, hub).await;
        board.share("budget_agreement", Value::Object(agreement), Some(ORCHESTRATOR));

        let query = prompts::synthesis_query(request, &outputs.attractions, &outputs.hotels, &outputs.weather);
        outputs.synthesis = run_stage(units, UnitRole::Synthesis, &query).await?;
        Ok(outputs)
    }

    /// Negotiate the budget frame with the synthesis unit.
    async fn agree_on_budget(&self, request: &TripRequest, hub: &Hub) -> Map<String, Value> {
        let mut proposal = Map::new();
        proposal.insert("budget".into(), json!(request.budget));
        if let Some(days) = request.duration_days() {
            proposal.insert("days".into(), json!(days));
        }
        let outcome = hub.negotiate(ORCHESTRATOR, &[SYNTHESIS_UNIT], "budget", proposal).await;
        if !outcome.consensus {
            log::warn!("Budget negotiation ended without consensus after {} round(s)", outcome.rounds);
        }
        outcome.final_proposal
    }
}

async fn run_stage(
    units: &BTreeMap<&'static str, Arc<SpecialistUnit>>,
    role: UnitRole,
    input: &str,
) -> Result<String, PlanningError> {
    let stage = role.unit_name();
    let Some(unit) = units.get(stage) else {
        return Err(PlanningError::Coordination(HubError::UnknownUnit(stage.to_string())));
    };
    let outcome = unit
        .run(input)
        .await
        .map_err(|source| PlanningError::Stage { stage, source })?;
    log::debug!(
        "Stage {} done - {} completion(s), {} tool call(s)",
        stage,
        outcome.completions,
        outcome.tool_results.len()
    );
    Ok(outcome.output)
}

/// Non-empty destination, parseable dates, end not before start.
pub fn validate_request(request: &TripRequest) -> Result<(), PlanningError> {
    if request.destination.trim().is_empty() {
        return Err(PlanningError::InvalidRequest("destination is empty".into()));
    }
    let (start, end) = request
        .dates()
        .map_err(|e| PlanningError::InvalidRequest(format!("dates must be YYYY-MM-DD: {}", e)))?;
    if end < start {
        return Err(PlanningError::InvalidRequest(format!(
            "end date {} is before start date {}",
            request.end_date, request.start_date
        )));
    }
    Ok(())
}

/// The JSON payload of a completion, without a surrounding code fence.
pub fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.split_once("```") {
        Some((_, rest)) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.split("```").next().unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

/// Parse the synthesis output into a plan.
pub fn parse_plan(output: &str) -> Result<TripPlan, PlanningError> {
    let payload = strip_json_fence(output);
    if payload.is_empty() {
        log::error!("Synthesis produced no plan");
        return Err(PlanningError::EmptyCompletion);
    }
    serde_json::from_str(payload).map_err(|e| {
        log::error!("Failed to parse plan: {} - raw output: {}", e, payload);
        PlanningError::InvalidPlan(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::prompts::{ATTRACTION_PROMPT, SYNTHESIS_PROMPT};
    use crate::agents::specialized::{ATTRACTIONS_KEY, HOTELS_KEY, WEATHER_KEY};
    use crate::llms::{ScriptedCompletion, Turn};
    use crate::tools::{FnCapability, ToolArguments};
    use crate::tools::amap::TEXT_SEARCH_TOOL;

    const PLAN_JSON: &str = r#"{
        "trip_title": "Beijing history weekend",
        "total_budget": {"transport_cost": 100, "dining_cost": 200, "hotel_cost": 800, "attraction_ticket_cost": 120, "total": 1220},
        "hotels": [{"name": "Wangfujing Hotel", "location": {"lat": 39.914, "lng": 116.410}, "price": 400}],
        "days": [
            {"day": 1, "theme": "Imperial city",
             "recommended_hotel": {"name": "Wangfujing Hotel", "location": {"lat": 39.914, "lng": 116.410}},
             "attractions": [
                {"name": "Forbidden City", "location": {"lat": 39.916, "lng": 116.397}, "ticket_price": 60},
                {"name": "Oriental Pearl", "location": {"lat": 31.239, "lng": 121.499}}
             ],
             "dinings": [{"name": "Quanjude", "location": {"lat": 39.899, "lng": 116.398}, "cost_per_person": "200 yuan"}]},
            {"day": 2, "theme": "Temples",
             "attractions": [{"name": "Temple of Heaven", "location": {"lat": 39.882, "lng": 116.406}}]}
        ]
    }"#;

    fn request() -> TripRequest {
        TripRequest::new("北京", "2025-10-01", "2025-10-02").with_preferences(["历史", "美食"])
    }

    fn is_synthesis(turns: &[Turn]) -> bool {
        turns.first().is_some_and(|t| t.content.starts_with(&SYNTHESIS_PROMPT[..30]))
    }

    fn planner_with(synthesis: impl Into<String>) -> (TripOrchestrator, Arc<ScriptedCompletion>) {
        let synthesis = synthesis.into();
        let completion = Arc::new(ScriptedCompletion::from_fn(move |turns: &[Turn]| {
            if is_synthesis(turns) {
                synthesis.clone()
            } else {
                "stage notes".to_string()
            }
        }));
        let planner = TripOrchestrator::new(completion.clone(), ToolRegistry::new(), PlannerConfig::default());
        (planner, completion)
    }

    #[tokio::test]
    async fn test_plan_filters_outside_points() {
        let (planner, completion) = planner_with(PLAN_JSON);
        let outcome = planner.plan(&request()).await.unwrap();

        assert_eq!(completion.call_count(), 4);
        assert_eq!(outcome.plan.trip_title, "Beijing history weekend");
        assert_eq!(outcome.report.removed, 1);
        assert_eq!(outcome.report.removed_names, vec!["Oriental Pearl".to_string()]);
        let names: Vec<_> = outcome.plan.days[0].attractions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Forbidden City"]);
        assert!(outcome.plan.days[0].recommended_hotel.is_some());
        assert!(planner.boards().is_empty());
    }

    #[tokio::test]
    async fn test_stage_outputs_flow_into_synthesis() {
        let completion = Arc::new(ScriptedCompletion::from_fn(|turns: &[Turn]| {
            let system = turns.first().map(|t| t.content.as_str()).unwrap_or("");
            if is_synthesis(turns) {
                PLAN_JSON.to_string()
            } else if system.starts_with("You are an attraction") {
                "ATTR-OUT".to_string()
            } else if system.starts_with("You are a hotel") {
                "HOTEL-OUT".to_string()
            } else {
                "WEATHER-OUT".to_string()
            }
        }));
        let config = PlannerConfig {
            retain_sessions: true,
            ..PlannerConfig::default()
        };
        let planner = TripOrchestrator::new(completion.clone(), ToolRegistry::new(), config);
        let outcome = planner.plan(&request()).await.unwrap();

        let calls = completion.calls();
        let synthesis_input = &calls[3].last().unwrap().content;
        assert!(synthesis_input.contains("ATTR-OUT"));
        assert!(synthesis_input.contains("HOTEL-OUT"));
        assert!(synthesis_input.contains("WEATHER-OUT"));
        assert!(calls[1].last().unwrap().content.contains("ATTR-OUT"));

        let board = planner.boards().get(&outcome.session_id).unwrap();
        assert_eq!(board.get_shared(ATTRACTIONS_KEY), Some(json!("ATTR-OUT")));
        assert_eq!(board.get_shared(HOTELS_KEY), Some(json!("HOTEL-OUT")));
        assert_eq!(board.get_shared(WEATHER_KEY), Some(json!("WEATHER-OUT")));
        assert_eq!(board.get_shared("budget_agreement").unwrap()["budget"], "moderate");
        assert!(board.has_shared("geofence_report"));
    }

    #[tokio::test]
    async fn test_retained_sessions_are_bounded() {
        let (_, completion) = planner_with(PLAN_JSON);
        let config = PlannerConfig {
            retain_sessions: true,
            max_retained_sessions: 2,
            ..PlannerConfig::default()
        };
        let planner = TripOrchestrator::new(completion, ToolRegistry::new(), config);

        let mut last = String::new();
        for _ in 0..3 {
            last = planner.plan(&request()).await.unwrap().session_id;
        }
        assert_eq!(planner.boards().len(), 2);
        assert!(planner.boards().get(&last).is_some());
    }

    struct StubPhotos {
        queries: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ImageLookup for StubPhotos {
        async fn photo_url(&self, query: &str) -> anyhow::Result<Option<String>> {
            self.queries.lock().push(query.to_string());
            if query.starts_with("Temple of Heaven") {
                anyhow::bail!("rate limited");
            }
            Ok(Some(format!("https://img/{}.jpg", query.split(' ').next().unwrap_or(""))))
        }
    }

    #[tokio::test]
    async fn test_photos_fill_only_missing_images() {
        let plan = r#"{
            "trip_title": "t", "total_budget": 500,
            "days": [
                {"day": 1, "attractions": [
                    {"name": "Forbidden City", "location": {"lat": 39.916, "lng": 116.397}},
                    {"name": "Beihai Park", "location": {"lat": 39.925, "lng": 116.389}, "image_urls": ["https://own.jpg"]},
                    {"name": "Oriental Pearl", "location": {"lat": 31.239, "lng": 121.499}}
                ]},
                {"day": 2, "attractions": [
                    {"name": "Temple of Heaven", "location": {"lat": 39.882, "lng": 116.406}}
                ]}
            ]
        }"#;
        let photos = Arc::new(StubPhotos {
            queries: parking_lot::Mutex::new(Vec::new()),
        });
        let (planner, _) = planner_with(plan);
        let planner = planner.with_image_lookup(photos.clone());

        let outcome = planner.plan(&request()).await.unwrap();
        let day1 = &outcome.plan.days[0].attractions;
        assert_eq!(day1[0].image_urls, vec!["https://img/Forbidden.jpg".to_string()]);
        assert_eq!(day1[1].image_urls, vec!["https://own.jpg".to_string()]);
        assert!(outcome.plan.days[1].attractions[0].image_urls.is_empty());

        let queries = photos.queries.lock().clone();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].contains("北京"));
        assert!(queries.iter().all(|q| !q.contains("Oriental Pearl") && !q.contains("Beihai")));
    }

    #[tokio::test]
    async fn test_tool_results_reach_attraction_stage() {
        let search = Arc::new(FnCapability::new(TEXT_SEARCH_TOOL, "POI search", |args: &ToolArguments| {
            Ok(format!("Forbidden City in {}", args.get("city").cloned().unwrap_or_default()))
        }));
        let completion = Arc::new(ScriptedCompletion::from_fn(|turns: &[Turn]| {
            let system = turns.first().map(|t| t.content.as_str()).unwrap_or("");
            let last = turns.last().map(|t| t.content.as_str()).unwrap_or("");
            if is_synthesis(turns) {
                PLAN_JSON.to_string()
            } else if system.starts_with(&ATTRACTION_PROMPT[..20]) && !last.starts_with("Tool results") {
                "[TOOL_CALL:amap_maps_text_search:keywords=历史,city=北京]".to_string()
            } else if last.starts_with("Tool results") {
                "found: Forbidden City".to_string()
            } else {
                "notes".to_string()
            }
        }));
        let planner = TripOrchestrator::new(
            completion.clone(),
            ToolRegistry::new().with(search.clone()),
            PlannerConfig::default(),
        );
        planner.plan(&request()).await.unwrap();

        assert_eq!(search.usage_count(), 1);
        assert_eq!(completion.call_count(), 5);
        assert!(completion.calls()[1].last().unwrap().content.contains("Forbidden City in 北京"));
    }

    #[tokio::test]
    async fn test_fenced_json_is_accepted() {
        let (planner, _) = planner_with(format!("Here you go:\n```json\n{}\n```", PLAN_JSON));
        let outcome = planner.plan(&request()).await.unwrap();
        assert_eq!(outcome.plan.days.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_synthesis() {
        let (planner, _) = planner_with("  ");
        let err = planner.plan(&request()).await.unwrap_err();
        assert!(matches!(err, PlanningError::EmptyCompletion));
        assert!(planner.boards().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_synthesis() {
        let (planner, completion) = planner_with("{\"trip_title\": ");
        let err = planner.plan(&request()).await.unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPlan(_)));
        assert_eq!(completion.call_count(), 4);
    }

    #[tokio::test]
    async fn test_completion_failure_names_stage() {
        let planner = TripOrchestrator::new(
            Arc::new(ScriptedCompletion::new(["only one answer"])),
            ToolRegistry::new(),
            PlannerConfig::default(),
        );
        let err = planner.plan(&request()).await.unwrap_err();
        assert!(matches!(err, PlanningError::Stage { stage: "hotel_recommendation", .. }));
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let (planner, completion) = planner_with(PLAN_JSON);
        for bad in [
            TripRequest::new(" ", "2025-10-01", "2025-10-02"),
            TripRequest::new("北京", "tomorrow", "2025-10-02"),
            TripRequest::new("北京", "2025-10-05", "2025-10-02"),
        ] {
            let err = planner.plan(&bad).await.unwrap_err();
            assert!(matches!(err, PlanningError::InvalidRequest(_)), "{:?}", bad);
        }
        assert_eq!(completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_seeded_and_stored() {
        let memory = Arc::new(InMemoryStore::new());
        memory
            .store("u1", "trip_planning", json!({"destination": "北京", "note": "loves 历史"}))
            .await
            .unwrap();
        let (planner, completion) = planner_with(PLAN_JSON);
        let planner = planner.with_memory(memory.clone());

        planner.plan(&request().with_user("u1")).await.unwrap();

        let first_system = &completion.calls()[0][0].content;
        assert!(first_system.contains("## Relevant memory"));
        assert!(first_system.contains("- trip_planning:"));
        assert_eq!(memory.len("u1"), 2);
    }

    #[test]
    fn test_plain_fence_after_preamble_parses() {
        let output = format!("Here is your itinerary:\n```\n{}\n```", PLAN_JSON);
        let plan = parse_plan(&output).unwrap();
        assert_eq!(plan.trip_title, "Beijing history weekend");
    }

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_json_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_json_fence("  {} "), "{}");
        assert_eq!(strip_json_fence("Here:\n```\n{\"a\":1}\n```\nEnjoy"), "{\"a\":1}");
        assert_eq!(strip_json_fence("Plan below\n```json\n{}"), "{}");
    }
}
