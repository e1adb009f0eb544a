use super::{RunSummary, recommendations, score_ratio};
use crate::orchestrator::state::{PhaseStatus, ValidationRun};
use crate::scoring::{ReadinessTier, RuleCompliance};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

/// Machine-readable report. `run` is the full snapshot, so the other
/// formats can be regenerated from this file alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub partial: bool,
    pub summary: RunSummary,
    pub threshold_compliance: Vec<RuleCompliance>,
    pub recommendations: Vec<String>,
    pub run: ValidationRun,
}

impl JsonReport {
    pub fn new(run: &ValidationRun, generated_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at,
            partial: super::is_partial(run),
            summary: RunSummary::of(run),
            threshold_compliance: run
                .config
                .scoring
                .compliance(run.overall_score, run.failed_count()),
            recommendations: recommendations(run),
            run: run.clone(),
        }
    }

    /// Load a previously written report.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report {}", path.display()))?;
        let report: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse report {}", path.display()))?;
        Ok(report)
    }
}

/// Per-phase entry in `metrics/scores.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetric {
    pub name: String,
    pub status: PhaseStatus,
    pub weight: u32,
    pub score: f64,
    pub ratio: f64,
    pub attempts: u32,
    pub duration_secs: Option<f64>,
}

/// Compact score record for dashboards and trend tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetrics {
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub overall_score: f64,
    pub max_score: u32,
    pub readiness_tier: ReadinessTier,
    pub recovery_attempts: usize,
    pub phases: Vec<PhaseMetric>,
}

impl ScoreMetrics {
    pub fn new(run: &ValidationRun, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            run_id: run.id,
            overall_score: run.overall_score,
            max_score: run.max_score,
            readiness_tier: run.readiness_tier,
            recovery_attempts: run.recovery_attempts.len(),
            phases: run
                .phases
                .iter()
                .map(|p| PhaseMetric {
                    name: p.name.clone(),
                    status: p.status,
                    weight: p.weight,
                    score: p.score,
                    ratio: score_ratio(p),
                    attempts: p.attempts,
                    duration_secs: p.duration_secs(),
                })
                .collect(),
        }
    }
}

pub fn render(run: &ValidationRun, generated_at: DateTime<Utc>) -> Result<String> {
    let report = JsonReport::new(run, generated_at);
    serde_json::to_string_pretty(&report).context("Failed to serialize validation report")
}

pub fn render_metrics(run: &ValidationRun, generated_at: DateTime<Utc>) -> Result<String> {
    serde_json::to_string_pretty(&ScoreMetrics::new(run, generated_at))
        .context("Failed to serialize score metrics")
}
