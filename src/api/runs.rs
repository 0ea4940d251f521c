//! Run lifecycle handlers: start, status, list, cancel.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::run::{RunEvent, RunState, StartRequest};

#[derive(Serialize)]
pub struct StartResponse {
    pub run_id: Uuid,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// `POST /api/runs` - validate and launch a run.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), (StatusCode, Json<ErrorResponse>)> {
    match state.controller.start(request).await {
        Ok(run_id) => Ok((
            StatusCode::ACCEPTED,
            Json(StartResponse {
                run_id,
                status: "started",
            }),
        )),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

#[derive(Serialize)]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub state: String,
    pub iterations_completed: u32,
    pub events: Vec<RunEvent>,
}

/// `GET /api/runs/{id}` - consistent snapshot of one run.
pub async fn run_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.controller.registry().get(id).await {
        Some(snapshot) => Ok(Json(RunStatusResponse {
            run_id: snapshot.state.id,
            state: snapshot.state.phase.to_string(),
            iterations_completed: snapshot.state.iterations_completed,
            events: snapshot.events,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("run {} not found", id),
            }),
        )),
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `GET /api/runs` - run summaries, newest first.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<RunState>> {
    Json(
        state
            .controller
            .registry()
            .list(query.session_id.as_deref())
            .await,
    )
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    pub status: String,
}

/// `POST /api/runs/{id}/cancel` - request cancellation.
///
/// Acknowledges with the phase at request time; a no-op for terminal runs.
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.controller.cancel(id).await {
        Some(phase) => Ok(Json(CancelResponse {
            run_id: id,
            status: phase.to_string(),
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("run {} not found", id),
            }),
        )),
    }
}

/// `GET /api/agents` - the configured agent roster.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let agents: Vec<serde_json::Value> = state
        .controller
        .agents()
        .all()
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "capability": a.capability,
                "provider_tag": a.provider_tag,
            })
        })
        .collect();
    Json(serde_json::Value::Array(agents))
}
