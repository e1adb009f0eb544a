//! Typed error hierarchy for the Gauntlet orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `ToolError`: failures raised while invoking and classifying an external tool
//! - `ConfigError`: malformed phase catalog or run configuration (fatal at startup)
//! - `StateError`: illegal phase status transitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure category used to route a failed attempt to a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ToolMissing,
    Timeout,
    OutOfMemory,
    StaleCache,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::ToolMissing => write!(f, "tool_missing"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::OutOfMemory => write!(f, "out_of_memory"),
            ErrorCategory::StaleCache => write!(f, "stale_cache"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// Errors from a single tool invocation.
///
/// None of these escape the orchestrator: they are converted into a failed
/// `PhaseResult` carrying the message and the category.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{tool}' not found: {source}")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tool '{tool}' timed out after {}s", timeout.as_secs_f64())]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("Tool '{tool}' failed (exit {exit_code}): {reason}")]
    ToolExecution {
        tool: String,
        exit_code: i32,
        reason: String,
        category: ErrorCategory,
    },

    #[error("Tool '{tool}' exited cleanly but output is missing expected marker: {expected}")]
    OutputParse { tool: String, expected: String },

    #[error("Recovery for {category} exhausted on phase '{phase}'")]
    RecoveryExhausted {
        phase: String,
        category: ErrorCategory,
    },

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("I/O error while running '{tool}': {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Category used for recovery routing.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ToolError::ToolMissing { .. } => ErrorCategory::ToolMissing,
            ToolError::ToolTimeout { .. } => ErrorCategory::Timeout,
            ToolError::ToolExecution { category, .. } => *category,
            ToolError::RecoveryExhausted { category, .. } => *category,
            ToolError::OutputParse { .. } | ToolError::Interrupted | ToolError::Io { .. } => {
                ErrorCategory::Unknown
            }
        }
    }

    /// Stable name of the variant, recorded next to the message in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ToolMissing { .. } => "ToolMissingError",
            ToolError::ToolTimeout { .. } => "ToolTimeoutError",
            ToolError::ToolExecution { .. } => "ToolExecutionError",
            ToolError::OutputParse { .. } => "OutputParseError",
            ToolError::RecoveryExhausted { .. } => "RecoveryExhaustedError",
            ToolError::Interrupted => "Interrupted",
            ToolError::Io { .. } => "ToolExecutionError",
        }
    }
}

/// Errors from configuration loading and phase catalog validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Duplicate phase name '{0}'")]
    DuplicatePhase(String),

    #[error("Phase '{phase}' depends on '{dependency}', which is not an earlier phase")]
    InvalidDependency { phase: String, dependency: String },

    #[error("Phase weights sum to {actual}, expected {expected}")]
    WeightMismatch { expected: u32, actual: u64 },

    #[error("Phase '{phase}' references unknown executor '{executor}'")]
    UnknownExecutor { phase: String, executor: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("No phases configured")]
    EmptyCatalog,
}

/// Errors from the phase state machine.
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("Phase '{phase}' cannot transition from {from} to {to}")]
    InvalidTransition {
        phase: String,
        from: String,
        to: String,
    },

    #[error("Phase '{0}' is not part of this run")]
    UnknownPhase(String),
}
