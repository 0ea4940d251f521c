//! HTTP API for autopilot.sh.
//!
//! ## Endpoints
//!
//! - `POST /api/runs` - Start a run
//! - `GET /api/runs` - List runs (optional `session_id` filter)
//! - `GET /api/runs/{id}` - Run status and full event history
//! - `POST /api/runs/{id}/cancel` - Request cancellation
//! - `GET /api/providers/health` - Per-provider health counters
//! - `GET /api/agents` - Configured agent roster
//! - `GET /api/health` - Service liveness

mod providers;
mod runs;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::AgentSet;
use crate::config::Config;
use crate::patch::PatchApplier;
use crate::provider::ProviderPool;
use crate::run::{RunController, RunRegistry};
use crate::verify::StandardVerifier;

/// Shared application state for handlers.
pub struct AppState {
    pub controller: RunController,
}

/// Build the controller and serve the HTTP API.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let agents = Arc::new(AgentSet::builtin());

    let descriptors = ProviderPool::load_descriptors(&config.providers_path)
        .map_err(|e| anyhow::anyhow!("cannot load providers from {}: {}", config.providers_path.display(), e))?;
    let pool = Arc::new(ProviderPool::from_descriptors(descriptors));

    let applier = PatchApplier::new(
        config.workspace_path.clone(),
        config.state_dir.join("backups"),
    );
    let verifier = Arc::new(StandardVerifier::new(config.health_url.clone()));

    let controller = RunController::new(
        agents,
        pool,
        RunRegistry::new(),
        verifier,
        applier,
        config.policy_path.clone(),
        config.state_dir.clone(),
        config.default_iterations,
        config.default_wait_s,
    );

    let state = Arc::new(AppState { controller });

    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Assemble the router; separated from [`serve`] so tests can drive handlers
/// without binding a socket.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/runs", post(runs::start_run).get(runs::list_runs))
        .route("/api/runs/:id", get(runs::run_status))
        .route("/api/runs/:id/cancel", post(runs::cancel_run))
        .route("/api/providers/health", get(providers::provider_health))
        .route("/api/agents", get(runs::list_agents))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
