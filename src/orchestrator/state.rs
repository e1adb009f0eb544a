use crate::errors::{ErrorCategory, StateError};
use crate::phase::PhaseSpec;
use crate::recovery::RecoveryAttempt;
use crate::scoring::{self, ReadinessTier, ScoringModel};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle of a phase within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseStatus::Success | PhaseStatus::Failed | PhaseStatus::Skipped
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Success => write!(f, "success"),
            PhaseStatus::Failed => write!(f, "failed"),
            PhaseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Record of one phase's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub status: PhaseStatus,
    pub weight: u32,
    pub score: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub artifact_paths: Vec<PathBuf>,
    /// Why the phase ended the way it did; always set for failed and skipped phases
    pub reason: Option<String>,
    pub error_category: Option<ErrorCategory>,
}

impl PhaseResult {
    pub fn pending(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            status: PhaseStatus::Pending,
            weight,
            score: 0.0,
            started_at: None,
            ended_at: None,
            attempts: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            artifact_paths: Vec::new(),
            reason: None,
            error_category: None,
        }
    }

    fn transition(&mut self, allowed_from: &[PhaseStatus], to: PhaseStatus) -> Result<(), StateError> {
        if !allowed_from.contains(&self.status) {
            return Err(StateError::InvalidTransition {
                phase: self.name.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending → Running.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(&[PhaseStatus::Pending], PhaseStatus::Running)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Running → Success with a score clamped to `[0, weight]`.
    pub fn succeed(&mut self, score: f64, at: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(&[PhaseStatus::Running], PhaseStatus::Success)?;
        self.score = score.clamp(0.0, self.weight as f64);
        self.ended_at = Some(at);
        Ok(())
    }

    /// Running → Failed; the score drops to zero.
    pub fn fail(
        &mut self,
        reason: &str,
        category: Option<ErrorCategory>,
        at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.transition(&[PhaseStatus::Running], PhaseStatus::Failed)?;
        self.score = 0.0;
        self.reason = Some(reason.to_string());
        self.error_category = category;
        self.ended_at = Some(at);
        Ok(())
    }

    /// Pending or Running → Skipped.
    pub fn skip(&mut self, reason: &str, at: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(
            &[PhaseStatus::Pending, PhaseStatus::Running],
            PhaseStatus::Skipped,
        )?;
        self.score = 0.0;
        self.reason = Some(reason.to_string());
        self.ended_at = Some(at);
        Ok(())
    }

    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Configuration captured into the run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub continue_on_error: bool,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
    pub jobs: usize,
    pub timeout_policy: String,
    pub scoring: ScoringModel,
}

/// Complete state of one orchestration invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config: RunConfigSnapshot,
    /// Phase results in registry order, keyed by `name`
    pub phases: Vec<PhaseResult>,
    pub overall_score: f64,
    pub max_score: u32,
    pub readiness_tier: ReadinessTier,
    pub recovery_attempts: Vec<RecoveryAttempt>,
    pub interrupted: bool,
    pub halted: bool,
}

impl ValidationRun {
    /// Create a run with one pending result per phase spec.
    pub fn new(config: RunConfigSnapshot, specs: &[PhaseSpec], started_at: DateTime<Utc>) -> Self {
        let max_score = config.scoring.max_score;
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            config,
            phases: specs
                .iter()
                .map(|s| PhaseResult::pending(&s.name, s.weight))
                .collect(),
            overall_score: 0.0,
            max_score,
            readiness_tier: ReadinessTier::NeedsImprovement,
            recovery_attempts: Vec::new(),
            interrupted: false,
            halted: false,
        }
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub(crate) fn phase_mut(&mut self, name: &str) -> Result<&mut PhaseResult, StateError> {
        self.phases
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| StateError::UnknownPhase(name.to_string()))
    }

    /// Store a finalized result. A phase can be finalized exactly once.
    pub fn commit(&mut self, result: PhaseResult) -> Result<(), StateError> {
        let slot = self.phase_mut(&result.name)?;
        if slot.status.is_terminal() || !result.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                phase: result.name.clone(),
                from: slot.status.to_string(),
                to: result.status.to_string(),
            });
        }
        *slot = result;
        Ok(())
    }

    /// Skip a phase that never started.
    pub fn skip_pending(&mut self, name: &str, reason: &str, at: DateTime<Utc>) -> Result<(), StateError> {
        self.phase_mut(name)?.skip(reason, at)
    }

    pub fn status_of(&self, name: &str) -> Option<PhaseStatus> {
        self.phase(name).map(|p| p.status)
    }

    /// Compute the aggregate score and tier and stamp the finish time.
    pub fn finalize(&mut self, model: &ScoringModel, at: DateTime<Utc>) {
        self.overall_score = scoring::overall_score(&self.phases);
        self.readiness_tier = model.tier(self.overall_score, self.failed_count());
        self.finished_at = Some(at);
    }

    pub fn total_count(&self) -> usize {
        self.phases.len()
    }

    /// Phases that actually ran to a verdict.
    pub fn executed_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Success | PhaseStatus::Failed))
            .count()
    }

    pub fn passed_count(&self) -> usize {
        self.count(PhaseStatus::Success)
    }

    pub fn failed_count(&self) -> usize {
        scoring::failed_count(&self.phases)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(PhaseStatus::Skipped)
    }

    fn count(&self, status: PhaseStatus) -> usize {
        self.phases.iter().filter(|p| p.status == status).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.phases.iter().all(|p| p.status.is_terminal())
    }
}

/// One line of a per-phase log file.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseLogEntry {
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub event: String,
    pub detail: String,
}

/// Per-phase log under `logs/<phase>.log`, rewritten by every run.
///
/// Format: `timestamp|attempt|event|detail`. The first line of a run is a
/// `run` event carrying the run id.
pub struct PhaseLog {
    path: PathBuf,
}

impl PhaseLog {
    pub fn new(log_dir: &Path, phase: &str) -> Self {
        Self {
            path: log_dir.join(format!("{}.log", phase)),
        }
    }

    /// Truncate the log and write the run header.
    pub fn start(log_dir: &Path, phase: &str, run_id: &str) -> Result<Self> {
        let log = Self::new(log_dir, phase);
        fs::write(&log.path, "").context("Failed to reset phase log")?;
        log.append(0, "run", run_id)?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, attempt: u32, event: &str, detail: &str) -> Result<()> {
        let entry = format!(
            "{}|{}|{}|{}\n",
            Utc::now().to_rfc3339(),
            attempt,
            event,
            detail.replace('\n', " ")
        );

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open phase log")?
            .write_all(entry.as_bytes())
            .context("Failed to write phase log entry")?;

        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<PhaseLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).context("Failed to read phase log")?;

        Ok(content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.splitn(4, '|').collect();
                if parts.len() < 4 {
                    return None;
                }
                Some(PhaseLogEntry {
                    timestamp: DateTime::parse_from_rfc3339(parts[0])
                        .ok()?
                        .with_timezone(&Utc),
                    attempt: parts[1].parse().unwrap_or(0),
                    event: parts[2].to_string(),
                    detail: parts[3].to_string(),
                })
            })
            .collect())
    }
}
