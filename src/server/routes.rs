//! Axum route handlers for the tripcrew HTTP server.
//!
//! # Routes
//!
//! - `GET  /health`         — Returns `{"status": "ok", "version": ..., "service": "tripcrew"}`
//! - `POST /api/trip/plan`  — Accepts a `TripRequest`, returns the validated plan

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::planner::{PlanOutcome, PlanningError, TripOrchestrator, TripRequest};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub planner: Arc<TripOrchestrator>,
}

impl AppState {
    pub fn new(planner: TripOrchestrator) -> Self {
        Self {
            planner: Arc::new(planner),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/trip/plan", post(plan_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "tripcrew",
    }))
}

/// POST /api/trip/plan — run the planner for one request.
async fn plan_handler(
    State(state): State<AppState>,
    Json(request): Json<TripRequest>,
) -> Result<Json<PlanOutcome>, (StatusCode, Json<Value>)> {
    match state.planner.plan(&request).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            log::error!("Trip planning failed for {}: {}", request.destination, e);
            Err((status_for(&e), Json(json!({"error": e.to_string()}))))
        }
    }
}

/// HTTP status for a planning failure.
pub fn status_for(error: &PlanningError) -> StatusCode {
    match error {
        PlanningError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PlanningError::Stage { .. } => StatusCode::BAD_GATEWAY,
        PlanningError::EmptyCompletion | PlanningError::InvalidPlan(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PlanningError::Coordination(_) | PlanningError::Setup(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
