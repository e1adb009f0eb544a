pub mod config;
pub mod errors;
pub mod executor;
pub mod gauntlet_config;
pub mod orchestrator;
pub mod phase;
pub mod recovery;
pub mod report;
pub mod scoring;
pub mod telemetry;
pub mod tool;
pub mod ui;
