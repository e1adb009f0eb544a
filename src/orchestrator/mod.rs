pub mod runner;
pub mod state;

pub use runner::{Orchestrator, RunSettings, backoff_delay};
pub use state::{PhaseLog, PhaseResult, PhaseStatus, RunConfigSnapshot, ValidationRun};
