//! tripcrew HTTP server binary.
//!
//! # Environment Variables
//!
//! - `TRIPCREW_CONFIG`: optional YAML configuration file
//! - `LLM_BASE_URL`, `LLM_API_KEY`, `LLM_MODEL_ID`, `LLM_TIMEOUT`: completion endpoint
//! - `AMAP_API_KEY`: AMap web service key
//! - `UNSPLASH_ACCESS_KEY`: optional, enables attraction photos
//! - `HOST`, `PORT`: bind address (default: 0.0.0.0:8000)
//! - `RUST_LOG`: tracing filter (default: "info,tripcrew=debug")
//!
//! # Usage
//!
//! ```bash
//! LLM_API_KEY=... AMAP_API_KEY=... cargo run --bin server
//! ```

use tripcrew::config::PlannerConfig;
use tripcrew::planner::TripOrchestrator;
use tripcrew::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tripcrew=debug".into()),
        )
        .init();

    let config = PlannerConfig::from_env()?;
    let bind_addr = config.server.bind_addr();
    tracing::info!(model = %config.llm.model, base_url = %config.llm.base_url, "Loaded configuration");

    let planner = TripOrchestrator::from_config(config)?;
    let app = app_router(AppState::new(planner));

    tracing::info!("tripcrew server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health         — liveness probe");
    tracing::info!("  POST /api/trip/plan  — plan a trip");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
