//! Report synthesis.
//!
//! Everything here is derived from a `ValidationRun` snapshot plus a
//! `generated_at` timestamp, so a report can be regenerated at any time and
//! two renders of the same snapshot differ only in that timestamp.

pub mod html;
pub mod json;
pub mod markdown;
pub mod writer;

use crate::errors::ErrorCategory;
use crate::orchestrator::state::{PhaseResult, PhaseStatus, ValidationRun};
use crate::orchestrator::runner::{REASON_DEPENDENCY, REASON_HALTED};
use crate::scoring::ReadinessTier;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use json::{JsonReport, ScoreMetrics};
pub use writer::{ReportPaths, write_bundle, write_durable};

/// Rendered artifacts for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportBundle {
    pub json: String,
    pub narrative: String,
    pub dashboard: String,
    pub metrics: String,
}

/// Phase counts shown at the top of every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub executed: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn of(run: &ValidationRun) -> Self {
        Self {
            executed: run.executed_count(),
            total: run.total_count(),
            passed: run.passed_count(),
            failed: run.failed_count(),
            skipped: run.skipped_count(),
        }
    }
}

/// Render every format from one snapshot.
pub fn render(run: &ValidationRun, generated_at: DateTime<Utc>) -> Result<ReportBundle> {
    Ok(ReportBundle {
        json: json::render(run, generated_at)?,
        narrative: markdown::render(run, generated_at),
        dashboard: html::render(run, generated_at),
        metrics: json::render_metrics(run, generated_at)?,
    })
}

/// Whether the report describes an incomplete run.
pub fn is_partial(run: &ValidationRun) -> bool {
    run.interrupted || !run.all_terminal()
}

/// Score as a fraction of the phase weight.
pub fn score_ratio(result: &PhaseResult) -> f64 {
    if result.weight == 0 {
        0.0
    } else {
        result.score / result.weight as f64
    }
}

/// Mechanical, rule-based recommendations. Order follows the phase table.
pub fn recommendations(run: &ValidationRun) -> Vec<String> {
    let mut recs = Vec::new();
    let low_ratio = run.config.scoring.low_score_ratio;

    for phase in &run.phases {
        match phase.status {
            PhaseStatus::Failed => {
                let reason = phase.reason.as_deref().unwrap_or("unknown failure");
                let hint = match phase.error_category {
                    Some(ErrorCategory::ToolMissing) => {
                        "install the tool or point its GAUNTLET_* variable at the binary".to_string()
                    }
                    Some(ErrorCategory::Timeout) => format!(
                        "raise its budget with --phase-timeout {}=SECS",
                        phase.name
                    ),
                    Some(ErrorCategory::OutOfMemory) => {
                        "raise recovery.base_heap_mb or reduce the model size".to_string()
                    }
                    Some(ErrorCategory::StaleCache) => {
                        "remove the phase cache directory and re-run".to_string()
                    }
                    Some(ErrorCategory::Unknown) | None => {
                        format!("inspect logs/{}.log and the attempt artifacts", phase.name)
                    }
                };
                recs.push(format!("Fix `{}` ({}): {}", phase.name, reason, hint));
            }
            PhaseStatus::Success if score_ratio(phase) < low_ratio => {
                recs.push(format!(
                    "Improve `{}`: scored {:.1} of {} ({:.0}%)",
                    phase.name,
                    phase.score,
                    phase.weight,
                    score_ratio(phase) * 100.0
                ));
            }
            _ => {}
        }
    }

    let blocked: Vec<&str> = run
        .phases
        .iter()
        .filter(|p| p.reason.as_deref() == Some(REASON_DEPENDENCY))
        .map(|p| p.name.as_str())
        .collect();
    if !blocked.is_empty() {
        recs.push(format!(
            "Re-run {} once their dependencies pass",
            blocked.join(", ")
        ));
    }

    if run.phases.iter().any(|p| p.reason.as_deref() == Some(REASON_HALTED)) {
        recs.push(
            "Run with --continue-on-error to evaluate the phases skipped after the halt".to_string(),
        );
    }
    if run.interrupted {
        recs.push("The run was interrupted; re-run for a complete verdict".to_string());
    }

    if run.readiness_tier != ReadinessTier::Ready {
        if let Some(rule) = run
            .config
            .scoring
            .rules
            .iter()
            .find(|r| r.tier == ReadinessTier::Ready)
        {
            recs.push(format!(
                "Reach {:.0} points with at most {} failed phases for Ready (currently {:.1} with {})",
                rule.min_score,
                rule.max_failures,
                run.overall_score,
                run.failed_count()
            ));
        }
    }

    if recs.is_empty() {
        recs.push("No action required".to_string());
    }
    recs
}

/// Timestamp form used in rendered reports; matches the JSON encoding.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_duration(secs: Option<f64>) -> String {
    match secs {
        None => "-".to_string(),
        Some(s) if s >= 60.0 => format!("{}m {}s", (s / 60.0) as u64, (s % 60.0) as u64),
        Some(s) => format!("{:.1}s", s),
    }
}
