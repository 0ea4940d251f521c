//! autopilot.sh - goal-driven task orchestration over pluggable model providers.
//!
//! A run takes a natural-language goal, routes it to an agent persona, and
//! drives a bounded propose/apply/verify loop: the provider pool produces a
//! changeset, the patch applier writes it under policy, and the verifier
//! decides whether to stop or feed the failure back into the next iteration.
//! Every transition lands in an append-only JSONL log under the state
//! directory so a run's history survives the process.

pub mod agents;
pub mod api;
pub mod changeset;
pub mod config;
pub mod patch;
pub mod policy;
pub mod provider;
pub mod run;
pub mod verify;

pub use config::Config;
pub use run::{RunController, RunPhase, StartRequest};
