//! HTTP surface of the trip planner.
//!
//! # Endpoints
//!
//! - `GET  /health`         — Liveness probe
//! - `POST /api/trip/plan`  — Plan a trip

pub mod routes;

pub use routes::{app_router, AppState};
