//! Provider diagnostics for operator dashboards.

use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use super::AppState;
use crate::provider::ProviderHealthSnapshot;

/// `GET /api/providers/health` - per-provider consecutive-failure counts and
/// request totals from the pool's health tracker.
pub async fn provider_health(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ProviderHealthSnapshot>> {
    Json(state.controller.pool().health().snapshots().await)
}
