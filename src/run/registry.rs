//! In-memory index of runs: state, event history, and cancellation.
//!
//! Multiple runs proceed independently; the registry supports concurrent
//! reads during writes from different runs without corrupting any single
//! run's event ordering. Status queries return cloned snapshots, so a caller
//! never observes a half-written state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::{RunEvent, RunPhase, RunState};

struct RunHandle {
    state: RunState,
    events: Vec<RunEvent>,
    cancel: CancellationToken,
}

/// Consistent point-in-time view of one run.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub state: RunState,
    pub events: Vec<RunEvent>,
}

/// Shared run index.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<Uuid, RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run before its first event is emitted, so a status query
    /// issued immediately after `start` returns always finds it.
    ///
    /// Returns the cancellation token the run's control loop should observe.
    pub async fn register(&self, state: RunState) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut runs = self.runs.write().await;
        runs.insert(
            state.id,
            RunHandle {
                state,
                events: Vec::new(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Record one transition: append the event and update phase/counter in a
    /// single critical section so snapshots stay consistent.
    pub async fn record(&self, run_id: Uuid, event: RunEvent, iterations_completed: u32) {
        let mut runs = self.runs.write().await;
        if let Some(handle) = runs.get_mut(&run_id) {
            handle.state.phase = event.phase;
            handle.state.iterations_completed = iterations_completed;
            handle.events.push(event);
        }
    }

    /// Snapshot one run's state and full event history.
    pub async fn get(&self, run_id: Uuid) -> Option<RunSnapshot> {
        let runs = self.runs.read().await;
        runs.get(&run_id).map(|handle| RunSnapshot {
            state: handle.state.clone(),
            events: handle.events.clone(),
        })
    }

    /// List runs, optionally filtered by session, newest first.
    pub async fn list(&self, session_id: Option<&str>) -> Vec<RunState> {
        let runs = self.runs.read().await;
        let mut states: Vec<RunState> = runs
            .values()
            .filter(|h| session_id.map_or(true, |s| h.state.session_id == s))
            .map(|h| h.state.clone())
            .collect();
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        states
    }

    /// Request cancellation of a run.
    ///
    /// Returns the phase at the time of the request, or `None` for unknown
    /// runs. Cancelling a terminal run is a no-op.
    pub async fn cancel(&self, run_id: Uuid) -> Option<RunPhase> {
        let runs = self.runs.read().await;
        runs.get(&run_id).map(|handle| {
            if !handle.state.phase.is_terminal() {
                handle.cancel.cancel();
            }
            handle.state.phase
        })
    }
}
