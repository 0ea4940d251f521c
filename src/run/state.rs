//! Run state, phases, events, and start-request validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::agents::AgentSet;

/// Phase of a run's state machine.
///
/// Transitions are monotonic except the bounded `Planning → ... → Planning`
/// retry of a failed iteration; each run reaches exactly one terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Planning,
    Applying,
    Verifying,
    Succeeded,
    Exhausted,
    Fatal,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded | RunPhase::Exhausted | RunPhase::Fatal | RunPhase::Cancelled
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Planning => write!(f, "planning"),
            Self::Applying => write!(f, "applying"),
            Self::Verifying => write!(f, "verifying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Fatal => write!(f, "fatal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a transition happened. Serialized snake_case into the event log so
/// operators can filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReason {
    RunStarted,
    IterationStarted,
    ChangesetStaged,
    ChangesetApplied,
    ChangesetRejected,
    ProviderExhausted,
    PolicyViolation,
    ApplyFailed,
    VerificationPassed,
    VerificationFailed,
    RunCompleted,
    RunExhausted,
    RunCancelled,
    FatalError,
}

/// One immutable, timestamped record in a run's audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: DateTime<Utc>,
    pub phase: RunPhase,
    pub reason: EventReason,
    pub detail: String,
}

impl RunEvent {
    pub fn now(phase: RunPhase, reason: EventReason, detail: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            phase,
            reason,
            detail: detail.into(),
        }
    }
}

/// Mutable state of one run, owned by its control loop.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub id: Uuid,
    pub session_id: String,
    pub goal: String,
    pub agent_id: String,
    pub max_iterations: u32,
    pub iterations_completed: u32,
    pub phase: RunPhase,
    pub created_at: DateTime<Utc>,
    /// Durable event log location for this run.
    pub log_path: PathBuf,
}

/// Parameters for starting a run.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub goal: String,
    pub session_id: String,
    /// Explicit agent; when absent the router picks one from the goal.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Iteration bound; defaults from config. Must be >= 1.
    #[serde(default)]
    pub iterations: Option<u32>,
    /// Wait between iterations in seconds; defaults from config.
    #[serde(default)]
    pub wait_s: Option<u64>,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("goal must not be empty")]
    EmptyGoal,

    #[error("session_id must not be empty")]
    EmptySession,

    #[error("iterations must be >= 1")]
    ZeroIterations,

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),
}

impl StartRequest {
    /// Validate and resolve the request against the configured agent set.
    ///
    /// Returns the resolved agent id, iteration bound, and inter-iteration
    /// wait. The same agent persists for the run's whole lifetime.
    pub fn resolve(
        &self,
        agents: &AgentSet,
        default_iterations: u32,
        default_wait_s: u64,
    ) -> Result<(String, u32, std::time::Duration), StartError> {
        if self.goal.trim().is_empty() {
            return Err(StartError::EmptyGoal);
        }
        if self.session_id.trim().is_empty() {
            return Err(StartError::EmptySession);
        }

        let iterations = self.iterations.unwrap_or(default_iterations);
        if iterations == 0 {
            return Err(StartError::ZeroIterations);
        }

        let agent_id = match &self.agent_id {
            Some(id) => agents
                .get(id)
                .map(|a| a.id.clone())
                .ok_or_else(|| StartError::UnknownAgent(id.clone()))?,
            None => agents.route(&self.goal).id.clone(),
        };

        let wait = std::time::Duration::from_secs(self.wait_s.unwrap_or(default_wait_s));
        Ok((agent_id, iterations, wait))
    }
}
