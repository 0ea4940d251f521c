//! Run orchestration: state machine, durable event log, and registry.

mod controller;
pub mod log;
mod registry;
mod state;

pub use controller::RunController;
pub use registry::{RunRegistry, RunSnapshot};
pub use state::{EventReason, RunEvent, RunPhase, RunState, StartError, StartRequest};
