//! Scoring and readiness model.
//!
//! Everything here is a pure function of phase results and configuration:
//! no clocks, no I/O, no hidden state.

use crate::orchestrator::state::{PhaseResult, PhaseStatus};
use serde::{Deserialize, Serialize};

/// Discrete readiness verdict for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessTier {
    Ready,
    Conditional,
    NeedsImprovement,
}

impl ReadinessTier {
    /// Process exit code for this tier.
    pub fn exit_code(self) -> u8 {
        match self {
            ReadinessTier::Ready => 0,
            ReadinessTier::Conditional => 2,
            ReadinessTier::NeedsImprovement => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReadinessTier::Ready => "Ready",
            ReadinessTier::Conditional => "Conditionally Ready",
            ReadinessTier::NeedsImprovement => "Needs Improvement",
        }
    }
}

impl std::fmt::Display for ReadinessTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessTier::Ready => write!(f, "ready"),
            ReadinessTier::Conditional => write!(f, "conditional"),
            ReadinessTier::NeedsImprovement => write!(f, "needs_improvement"),
        }
    }
}

/// One `(minScore, maxFailures) → Tier` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub tier: ReadinessTier,
    pub min_score: f64,
    pub max_failures: usize,
}

impl TierRule {
    pub fn new(tier: ReadinessTier, min_score: f64, max_failures: usize) -> Self {
        Self {
            tier,
            min_score,
            max_failures,
        }
    }

    pub fn matches(&self, overall_score: f64, failed_count: usize) -> bool {
        overall_score >= self.min_score && failed_count <= self.max_failures
    }
}

/// Ordered readiness rules evaluated top-down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringModel {
    pub rules: Vec<TierRule>,
    pub max_score: u32,
    pub low_score_ratio: f64,
}

impl ScoringModel {
    pub fn new(rules: Vec<TierRule>, max_score: u32, low_score_ratio: f64) -> Self {
        Self {
            rules,
            max_score,
            low_score_ratio,
        }
    }

    /// First matching rule wins; no match means `NeedsImprovement`.
    pub fn tier(&self, overall_score: f64, failed_count: usize) -> ReadinessTier {
        self.rules
            .iter()
            .find(|r| r.matches(overall_score, failed_count))
            .map(|r| r.tier)
            .unwrap_or(ReadinessTier::NeedsImprovement)
    }

    /// Evaluate every rule, for threshold compliance tables.
    pub fn compliance(&self, overall_score: f64, failed_count: usize) -> Vec<RuleCompliance> {
        self.rules
            .iter()
            .map(|rule| RuleCompliance {
                tier: rule.tier,
                min_score: rule.min_score,
                max_failures: rule.max_failures,
                score_met: overall_score >= rule.min_score,
                failures_met: failed_count <= rule.max_failures,
            })
            .collect()
    }
}

/// Result of checking one tier rule against a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCompliance {
    pub tier: ReadinessTier,
    pub min_score: f64,
    pub max_failures: usize,
    pub score_met: bool,
    pub failures_met: bool,
}

impl RuleCompliance {
    pub fn met(&self) -> bool {
        self.score_met && self.failures_met
    }
}

/// Score for a successful phase: `quality × weight`, clamped to `[0, weight]`.
pub fn phase_score(quality: f64, weight: u32) -> f64 {
    let quality = if quality.is_finite() { quality } else { 0.0 };
    let raw = quality * weight as f64;
    round2(raw.clamp(0.0, weight as f64))
}

/// Sum of successful phase scores, capped at the sum of weights.
pub fn overall_score(results: &[PhaseResult]) -> f64 {
    let total: f64 = results
        .iter()
        .filter(|r| r.status == PhaseStatus::Success)
        .map(|r| r.score)
        .sum();
    let cap: f64 = results.iter().map(|r| r.weight as f64).sum();
    round2(total.min(cap))
}

pub fn failed_count(results: &[PhaseResult]) -> usize {
    results
        .iter()
        .filter(|r| r.status == PhaseStatus::Failed)
        .count()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
