//! The autopilot run controller: one bounded iterate-propose-apply-verify
//! state machine per run.
//!
//! Each run executes as its own tokio task; iterations within a run are
//! strictly sequential. Provider failures, rejected change-sets, policy
//! violations, and verification failures are recovered locally as
//! `IterationFailed` outcomes and never surface as errors to the caller -
//! they exist only as run events and phase transitions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::{Agent, AgentSet};
use crate::changeset::{self, ChangeSet};
use crate::patch::{ApplyError, PatchApplier};
use crate::policy::PolicyDocument;
use crate::provider::{ChatMessage, ProviderPool};
use crate::run::log::RunLog;
use crate::run::registry::RunRegistry;
use crate::run::state::{EventReason, RunEvent, RunPhase, RunState, StartError, StartRequest};
use crate::verify::Verifier;

/// Shared dependencies for run control loops.
pub struct RunController {
    agents: Arc<AgentSet>,
    pool: Arc<ProviderPool>,
    registry: RunRegistry,
    verifier: Arc<dyn Verifier>,
    applier: PatchApplier,
    policy_path: PathBuf,
    state_dir: PathBuf,
    default_iterations: u32,
    default_wait_s: u64,
}

impl RunController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<AgentSet>,
        pool: Arc<ProviderPool>,
        registry: RunRegistry,
        verifier: Arc<dyn Verifier>,
        applier: PatchApplier,
        policy_path: PathBuf,
        state_dir: PathBuf,
        default_iterations: u32,
        default_wait_s: u64,
    ) -> Self {
        Self {
            agents,
            pool,
            registry,
            verifier,
            applier,
            policy_path,
            state_dir,
            default_iterations,
            default_wait_s,
        }
    }

    /// The registry backing this controller, for status queries.
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// The provider pool, for the diagnostic endpoint.
    pub fn pool(&self) -> &Arc<ProviderPool> {
        &self.pool
    }

    /// The configured agent roster.
    pub fn agents(&self) -> &Arc<AgentSet> {
        &self.agents
    }

    /// Validate a start request, register the run, and spawn its control
    /// loop. Returns the run id synchronously; everything after validation is
    /// reported through run events, not errors.
    pub async fn start(&self, request: StartRequest) -> Result<Uuid, StartError> {
        let (agent_id, max_iterations, wait) =
            request.resolve(&self.agents, self.default_iterations, self.default_wait_s)?;

        let run_id = Uuid::new_v4();
        let state = RunState {
            id: run_id,
            session_id: request.session_id.clone(),
            goal: request.goal.clone(),
            agent_id: agent_id.clone(),
            max_iterations,
            iterations_completed: 0,
            phase: RunPhase::Pending,
            created_at: chrono::Utc::now(),
            log_path: RunLog::path_for(&self.state_dir, run_id),
        };

        // Registration must be visible before the first event is appended.
        let cancel = self.registry.register(state).await;

        let loop_ctx = LoopContext {
            run_id,
            goal: request.goal,
            agent: self
                .agents
                .get(&agent_id)
                .cloned()
                .unwrap_or_else(|| self.agents.default_agent().clone()),
            max_iterations,
            wait,
            pool: Arc::clone(&self.pool),
            registry: self.registry.clone(),
            verifier: Arc::clone(&self.verifier),
            applier: self.applier.clone(),
            policy_path: self.policy_path.clone(),
            state_dir: self.state_dir.clone(),
            cancel,
        };

        tokio::spawn(async move {
            loop_ctx.run().await;
        });

        Ok(run_id)
    }

    /// Request cancellation; observed by the run at its next phase boundary.
    /// Returns the phase at request time, `None` for unknown runs.
    pub async fn cancel(&self, run_id: Uuid) -> Option<RunPhase> {
        self.registry.cancel(run_id).await
    }
}

/// Outcome of one iteration attempt.
enum IterationOutcome {
    Verified,
    Failed { reason: EventReason, detail: String },
    /// Durable log append failed mid-iteration; stop without further events.
    Aborted,
}

/// Everything one run's control loop owns.
struct LoopContext {
    run_id: Uuid,
    goal: String,
    agent: Agent,
    max_iterations: u32,
    wait: Duration,
    pool: Arc<ProviderPool>,
    registry: RunRegistry,
    verifier: Arc<dyn Verifier>,
    applier: PatchApplier,
    policy_path: PathBuf,
    state_dir: PathBuf,
    cancel: CancellationToken,
}

impl LoopContext {
    async fn run(self) {
        let mut log = match RunLog::create(&self.state_dir, self.run_id).await {
            Ok(log) => log,
            Err(e) => {
                // Run storage unwritable: fatal before any durable event.
                tracing::error!(run_id = %self.run_id, "Cannot create run log: {}", e);
                self.registry
                    .record(
                        self.run_id,
                        RunEvent::now(
                            RunPhase::Fatal,
                            EventReason::FatalError,
                            format!("run event log unwritable: {}", e),
                        ),
                        0,
                    )
                    .await;
                return;
            }
        };

        let mut emitter = Emitter {
            run_id: self.run_id,
            registry: self.registry.clone(),
            log: &mut log,
            iterations_completed: 0,
            fatal: false,
        };

        emitter
            .emit(
                RunPhase::Pending,
                EventReason::RunStarted,
                format!("goal accepted, agent={}", self.agent.id),
            )
            .await;

        // The policy snapshot is loaded once and stays fixed for the run, so
        // authorization semantics cannot shift between iterations.
        let policy = match PolicyDocument::load(&self.policy_path) {
            Ok(policy) => policy,
            Err(e) => {
                emitter
                    .emit(
                        RunPhase::Fatal,
                        EventReason::FatalError,
                        format!("policy document unreadable: {}", e),
                    )
                    .await;
                return;
            }
        };

        let mut failure_context: Vec<String> = Vec::new();

        loop {
            if emitter.fatal {
                return;
            }
            if self.cancel.is_cancelled() {
                emitter
                    .emit(
                        RunPhase::Cancelled,
                        EventReason::RunCancelled,
                        "cancellation observed at iteration boundary",
                    )
                    .await;
                return;
            }

            let iteration = emitter.iterations_completed;
            emitter
                .emit(
                    RunPhase::Planning,
                    EventReason::IterationStarted,
                    format!("iteration {} of {}", iteration + 1, self.max_iterations),
                )
                .await;
            if emitter.fatal {
                return;
            }

            let outcome = self
                .run_iteration(&mut emitter, &policy, &failure_context)
                .await;

            match outcome {
                IterationOutcome::Aborted => return,
                IterationOutcome::Verified => {
                    emitter.iterations_completed += 1;
                    emitter
                        .emit(
                            RunPhase::Succeeded,
                            EventReason::RunCompleted,
                            format!(
                                "goal achieved after {} iteration(s)",
                                emitter.iterations_completed
                            ),
                        )
                        .await;
                    return;
                }
                IterationOutcome::Failed { reason, detail } => {
                    emitter.iterations_completed += 1;
                    tracing::info!(
                        run_id = %self.run_id,
                        iteration = emitter.iterations_completed,
                        reason = ?reason,
                        "Iteration failed: {}",
                        detail
                    );
                    failure_context.push(detail);

                    if emitter.iterations_completed >= self.max_iterations {
                        emitter
                            .emit(
                                RunPhase::Exhausted,
                                EventReason::RunExhausted,
                                format!(
                                    "iteration bound {} reached without passing verification; last failure: {}",
                                    self.max_iterations,
                                    failure_context.last().map(String::as_str).unwrap_or("-")
                                ),
                            )
                            .await;
                        return;
                    }
                }
            }

            // Inter-iteration wait, interruptible by cancellation.
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    emitter
                        .emit(
                            RunPhase::Cancelled,
                            EventReason::RunCancelled,
                            "cancellation observed during inter-iteration wait",
                        )
                        .await;
                    return;
                }
                _ = tokio::time::sleep(self.wait) => {}
            }
        }
    }

    /// One pass through Planning → Applying → Verifying.
    async fn run_iteration(
        &self,
        emitter: &mut Emitter<'_>,
        policy: &PolicyDocument,
        failure_context: &[String],
    ) -> IterationOutcome {
        // Planning: ask the pool for a change-set proposal.
        let messages = self.build_messages(failure_context);
        let raw = match self.pool.execute(&self.agent.provider_tag, &messages).await {
            Ok(text) => text,
            Err(e) => {
                let detail = format!("provider pool exhausted: {}", e.detail());
                emitter
                    .emit(RunPhase::Planning, EventReason::ProviderExhausted, detail.clone())
                    .await;
                if emitter.fatal {
                    return IterationOutcome::Aborted;
                }
                return IterationOutcome::Failed {
                    reason: EventReason::ProviderExhausted,
                    detail,
                };
            }
        };

        let changeset: ChangeSet = match changeset::parse(&raw) {
            Ok(cs) => cs,
            Err(e) => {
                let detail = format!("changeset rejected: {}", e);
                emitter
                    .emit(RunPhase::Planning, EventReason::ChangesetRejected, detail.clone())
                    .await;
                if emitter.fatal {
                    return IterationOutcome::Aborted;
                }
                return IterationOutcome::Failed {
                    reason: EventReason::ChangesetRejected,
                    detail,
                };
            }
        };

        // Applying: all-or-nothing through the policy gate.
        emitter
            .emit(
                RunPhase::Applying,
                EventReason::ChangesetStaged,
                format!(
                    "staging {} edit(s): {}",
                    changeset.edits.len(),
                    changeset.commit_message
                ),
            )
            .await;
        if emitter.fatal {
            // The tree must not change once the audit trail is dead.
            return IterationOutcome::Aborted;
        }

        let undo = match self.applier.apply(&changeset, policy).await {
            Ok(undo) => undo,
            Err(ApplyError::PolicyViolation { path }) => {
                let detail = format!("policy denies edit to '{}'; changeset dropped", path);
                emitter
                    .emit(RunPhase::Applying, EventReason::PolicyViolation, detail.clone())
                    .await;
                if emitter.fatal {
                    return IterationOutcome::Aborted;
                }
                return IterationOutcome::Failed {
                    reason: EventReason::PolicyViolation,
                    detail,
                };
            }
            Err(e) => {
                let detail = format!("apply failed and was rolled back: {}", e);
                emitter
                    .emit(RunPhase::Applying, EventReason::ApplyFailed, detail.clone())
                    .await;
                if emitter.fatal {
                    return IterationOutcome::Aborted;
                }
                return IterationOutcome::Failed {
                    reason: EventReason::ApplyFailed,
                    detail,
                };
            }
        };

        // Verifying.
        emitter
            .emit(
                RunPhase::Verifying,
                EventReason::ChangesetApplied,
                format!("changeset applied ({})", undo.summary()),
            )
            .await;
        if emitter.fatal {
            return IterationOutcome::Aborted;
        }

        let verdict = self
            .verifier
            .verify(&changeset, self.applier.root(), policy)
            .await;

        if verdict.passed {
            emitter
                .emit(
                    RunPhase::Verifying,
                    EventReason::VerificationPassed,
                    verdict.detail,
                )
                .await;
            if emitter.fatal {
                return IterationOutcome::Aborted;
            }
            IterationOutcome::Verified
        } else {
            emitter
                .emit(
                    RunPhase::Verifying,
                    EventReason::VerificationFailed,
                    verdict.detail.clone(),
                )
                .await;
            if emitter.fatal {
                return IterationOutcome::Aborted;
            }
            IterationOutcome::Failed {
                reason: EventReason::VerificationFailed,
                detail: format!("verification failed: {}", verdict.detail),
            }
        }
    }

    /// Build the prompt: the agent's persona as the system message, the goal
    /// plus accumulated failure context as the user message.
    fn build_messages(&self, failure_context: &[String]) -> Vec<ChatMessage> {
        let mut user = format!("Goal: {}", self.goal);
        if !failure_context.is_empty() {
            user.push_str("\n\nPrevious attempts failed:");
            for (i, failure) in failure_context.iter().enumerate() {
                user.push_str(&format!("\n{}. {}", i + 1, failure));
            }
            user.push_str("\n\nPropose a different change that addresses these failures.");
        }
        vec![
            ChatMessage::system(self.agent.system_prompt.clone()),
            ChatMessage::user(user),
        ]
    }
}

/// Appends each transition to the durable log and the registry.
///
/// A durable-log write failure is a fatal condition: the run stops rather
/// than continue with an audit trail that silently diverges from reality.
struct Emitter<'a> {
    run_id: Uuid,
    registry: RunRegistry,
    log: &'a mut RunLog,
    iterations_completed: u32,
    /// Set once a durable write fails; the loop must stop emitting.
    fatal: bool,
}

impl Emitter<'_> {
    async fn emit(&mut self, phase: RunPhase, reason: EventReason, detail: impl Into<String>) {
        if self.fatal {
            return;
        }
        let event = RunEvent::now(phase, reason, detail);
        if let Err(e) = self.log.append(&event).await {
            tracing::error!(run_id = %self.run_id, "Run log append failed: {}", e);
            self.fatal = true;
            let fatal = RunEvent::now(
                RunPhase::Fatal,
                EventReason::FatalError,
                format!("run event log unwritable: {}", e),
            );
            self.registry
                .record(self.run_id, fatal, self.iterations_completed)
                .await;
            return;
        }
        self.registry
            .record(self.run_id, event, self.iterations_completed)
            .await;
    }
}
