//! External tool boundary: subprocess invocation and outcome classification.

pub mod adapter;
pub mod classify;

pub use adapter::{ToolInvocation, ToolOutcome, ToolPaths, invoke};
pub use classify::{Assessment, Classifier, categorize_failure, missing_command};
