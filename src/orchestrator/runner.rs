//! Phase scheduling, retries and recovery.
//!
//! The scheduling loop in [`Orchestrator::run`] is the only writer of the
//! run's phase table. Each started phase runs in its own task, retrying and
//! recovering locally, and sends exactly one finished `PhaseResult` back over
//! a channel.

use crate::config::Config;
use crate::errors::{ConfigError, ErrorCategory, ToolError};
use crate::executor::{ExecutorRegistry, PhaseContext, PhaseExecutor};
use crate::orchestrator::state::{
    PhaseLog, PhaseResult, PhaseStatus, RunConfigSnapshot, ValidationRun,
};
use crate::phase::{PhaseRegistry, PhaseSpec};
use crate::recovery::{PhaseOverrides, RecoveryAttempt, RecoveryLedger, RecoveryPolicy};
use crate::scoring::{self, ScoringModel};
use crate::ui::OrchestratorUI;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const REASON_DISABLED: &str = "disabled";
pub const REASON_DEPENDENCY: &str = "dependency not satisfied";
pub const REASON_HALTED: &str = "run halted";
pub const REASON_INTERRUPTED: &str = "interrupted";
pub const REASON_RUN_INTERRUPTED: &str = "run interrupted";

/// Delay before the attempt following `attempt` (1-based): `base × attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

/// Run-wide execution settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub continue_on_error: bool,
    /// Total attempts per phase, at least 1
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Phases allowed in flight at once; 1 is sequential
    pub jobs: usize,
    pub project_dir: PathBuf,
    pub log_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub scoring: ScoringModel,
    pub snapshot: RunConfigSnapshot,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        let settings = config.settings();
        let scoring = ScoringModel::new(
            settings.scoring.tiers.clone(),
            settings.scoring.max_score,
            settings.scoring.low_score_ratio,
        );
        let snapshot = RunConfigSnapshot {
            continue_on_error: settings.run.continue_on_error,
            max_retries: settings.run.max_retries,
            backoff_base_ms: settings.run.backoff_base_ms,
            timeout_secs: settings.run.timeout_secs,
            jobs: settings.run.jobs,
            timeout_policy: format!("{:?}", settings.recovery.timeout_policy).to_lowercase(),
            scoring: scoring.clone(),
        };

        Self {
            continue_on_error: settings.run.continue_on_error,
            max_attempts: settings.run.max_retries.max(1),
            backoff_base: Duration::from_millis(settings.run.backoff_base_ms),
            jobs: settings.run.jobs.max(1),
            project_dir: config.project_dir.clone(),
            log_dir: config.log_dir.clone(),
            artifact_dir: config.artifact_dir.clone(),
            scoring,
            snapshot,
        }
    }
}

/// Final word from a phase task.
#[derive(Debug)]
struct PhaseCompletion {
    result: PhaseResult,
    recovery: Vec<RecoveryAttempt>,
}

/// Drives a `PhaseRegistry` to a finalized `ValidationRun`.
pub struct Orchestrator {
    registry: PhaseRegistry,
    executors: ExecutorRegistry,
    recovery: Arc<RecoveryPolicy>,
    settings: Arc<RunSettings>,
    cancel: CancellationToken,
    ui: Option<Arc<OrchestratorUI>>,
}

impl Orchestrator {
    /// Every phase's executor reference must resolve in `executors`.
    pub fn new(
        registry: PhaseRegistry,
        executors: ExecutorRegistry,
        recovery: RecoveryPolicy,
        settings: RunSettings,
    ) -> Result<Self, ConfigError> {
        for spec in registry.iter() {
            if !executors.contains(&spec.executor) {
                return Err(ConfigError::UnknownExecutor {
                    phase: spec.name.clone(),
                    executor: spec.executor.clone(),
                });
            }
        }
        Ok(Self {
            registry,
            executors,
            recovery: Arc::new(recovery),
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
            ui: None,
        })
    }

    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Share an externally owned token, e.g. one cancelled by Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// Execute every phase and return the finalized run.
    ///
    /// Every phase is terminal when this returns, including on interrupt.
    pub async fn run(&self) -> Result<ValidationRun> {
        std::fs::create_dir_all(&self.settings.log_dir).context("Failed to create log directory")?;

        let mut run = ValidationRun::new(
            self.settings.snapshot.clone(),
            self.registry.phases(),
            Utc::now(),
        );
        info!(run_id = %run.id, phases = run.total_count(), jobs = self.settings.jobs, "Validation run started");

        for spec in self.registry.iter().filter(|s| !s.enabled) {
            run.skip_pending(&spec.name, REASON_DISABLED, Utc::now())?;
            if let Some(ref why) = spec.disabled_reason {
                run.phase_mut(&spec.name)?.warnings.push(why.clone());
            }
            if let Some(ref ui) = self.ui {
                ui.phase_skipped(&spec.name, REASON_DISABLED);
            }
        }

        let (result_tx, mut result_rx) = mpsc::channel::<PhaseCompletion>(self.registry.len().max(1));
        let mut active_tasks: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            if self.cancel.is_cancelled() && !run.interrupted {
                warn!("Interrupt received, stopping scheduling");
                run.interrupted = true;
                if let Some(ref ui) = self.ui {
                    ui.halted("Interrupted, finishing in-flight phases");
                }
            }

            if !run.halted && !run.interrupted {
                self.dispatch_ready(&mut run, &mut active_tasks, &result_tx)?;
            }

            if active_tasks.is_empty() {
                break;
            }

            tokio::select! {
                received = result_rx.recv() => {
                    let Some(completion) = received else { break };
                    if let Some(handle) = active_tasks.remove(&completion.result.name) {
                        handle.await.ok();
                    }
                    let failed = completion.result.status == PhaseStatus::Failed;
                    let name = completion.result.name.clone();
                    self.absorb(&mut run, completion)?;

                    if failed && !self.settings.continue_on_error && !run.halted {
                        run.halted = true;
                        warn!(phase = %name, "Phase failed and continue_on_error is off, halting");
                        if let Some(ref ui) = self.ui {
                            ui.halted(&format!("Halting after '{}' failed", name));
                        }
                    }
                }
                _ = self.cancel.cancelled(), if !run.interrupted => {
                    // Picked up at the top of the loop.
                }
            }
        }

        let remainder = if run.interrupted {
            REASON_RUN_INTERRUPTED
        } else {
            REASON_HALTED
        };
        let pending: Vec<String> = run
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Pending)
            .map(|p| p.name.clone())
            .collect();
        for name in pending {
            run.skip_pending(&name, remainder, Utc::now())?;
            if let Some(ref ui) = self.ui {
                ui.phase_skipped(&name, remainder);
            }
        }

        run.finalize(&self.settings.scoring, Utc::now());
        info!(
            run_id = %run.id,
            score = run.overall_score,
            tier = %run.readiness_tier,
            executed = run.executed_count(),
            total = run.total_count(),
            "Validation run finished"
        );
        if let Some(ref ui) = self.ui {
            ui.finish(run.overall_score, run.max_score, run.readiness_tier);
        }

        Ok(run)
    }

    /// Start every pending phase whose dependency is terminal, in registry
    /// order, up to the `jobs` limit. Phases behind a failed or skipped
    /// dependency are skipped here.
    fn dispatch_ready(
        &self,
        run: &mut ValidationRun,
        active_tasks: &mut HashMap<String, JoinHandle<()>>,
        result_tx: &mpsc::Sender<PhaseCompletion>,
    ) -> Result<()> {
        for spec in self.registry.iter() {
            if active_tasks.len() >= self.settings.jobs {
                break;
            }
            if run.status_of(&spec.name) != Some(PhaseStatus::Pending) {
                continue;
            }

            if let Some(ref dep) = spec.depends_on {
                match run.status_of(dep) {
                    Some(PhaseStatus::Success) => {}
                    Some(PhaseStatus::Failed) | Some(PhaseStatus::Skipped) | None => {
                        debug!(phase = %spec.name, dependency = %dep, "Dependency not satisfied");
                        run.skip_pending(&spec.name, REASON_DEPENDENCY, Utc::now())?;
                        if let Some(ref ui) = self.ui {
                            ui.phase_skipped(&spec.name, REASON_DEPENDENCY);
                        }
                        continue;
                    }
                    Some(PhaseStatus::Pending) | Some(PhaseStatus::Running) => continue,
                }
            }

            let executor = self.executors.get(&spec.executor).ok_or_else(|| {
                ConfigError::UnknownExecutor {
                    phase: spec.name.clone(),
                    executor: spec.executor.clone(),
                }
            })?;

            let slot = run.phase_mut(&spec.name)?;
            slot.start(Utc::now())?;
            let result = slot.clone();

            if let Some(ref ui) = self.ui {
                let label = if spec.description.is_empty() {
                    spec.executor.as_str()
                } else {
                    spec.description.as_str()
                };
                ui.start_phase(&spec.name, label);
            }

            let task = PhaseTask {
                run_id: run.id.to_string(),
                spec: spec.clone(),
                executor,
                recovery: Arc::clone(&self.recovery),
                settings: Arc::clone(&self.settings),
                cancel: self.cancel.clone(),
                ui: self.ui.clone(),
                result: result.clone(),
            };
            let tx = result_tx.clone();
            let span = info_span!("phase", name = %spec.name);

            let handle = tokio::spawn(
                async move {
                    let completion = match AssertUnwindSafe(task.execute()).catch_unwind().await {
                        Ok(completion) => completion,
                        Err(_) => {
                            error!("Phase task panicked");
                            let mut result = result;
                            result.attempts = result.attempts.max(1);
                            result.errors.push("executor panicked".to_string());
                            result
                                .fail("executor panicked", Some(ErrorCategory::Unknown), Utc::now())
                                .ok();
                            PhaseCompletion {
                                result,
                                recovery: Vec::new(),
                            }
                        }
                    };
                    tx.send(completion).await.ok();
                }
                .instrument(span),
            );

            active_tasks.insert(spec.name.clone(), handle);
        }
        Ok(())
    }

    fn absorb(&self, run: &mut ValidationRun, completion: PhaseCompletion) -> Result<()> {
        let PhaseCompletion { result, recovery } = completion;

        if let Some(ref ui) = self.ui {
            match result.status {
                PhaseStatus::Success => ui.phase_succeeded(&result.name, result.score, result.weight),
                PhaseStatus::Failed => {
                    ui.phase_failed(&result.name, result.reason.as_deref().unwrap_or("failed"))
                }
                PhaseStatus::Skipped => {
                    ui.phase_skipped(&result.name, result.reason.as_deref().unwrap_or("skipped"))
                }
                PhaseStatus::Pending | PhaseStatus::Running => {}
            }
        }

        info!(
            phase = %result.name,
            status = %result.status,
            score = result.score,
            attempts = result.attempts,
            "Phase finished"
        );

        run.recovery_attempts.extend(recovery);
        run.commit(result)?;
        Ok(())
    }
}

/// One phase's retry loop, owned by its own task.
struct PhaseTask {
    run_id: String,
    spec: PhaseSpec,
    executor: Arc<dyn PhaseExecutor>,
    recovery: Arc<RecoveryPolicy>,
    settings: Arc<RunSettings>,
    cancel: CancellationToken,
    ui: Option<Arc<OrchestratorUI>>,
    result: PhaseResult,
}

impl PhaseTask {
    /// Attempts share one deadline: the phase budget measured from the first
    /// attempt. Each attempt and backoff gets only what is left of it.
    async fn execute(self) -> PhaseCompletion {
        let PhaseTask {
            run_id,
            spec,
            executor,
            recovery,
            settings,
            cancel,
            ui,
            mut result,
        } = self;

        let log = match PhaseLog::start(&settings.log_dir, &spec.name, &run_id) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "Could not reset phase log");
                PhaseLog::new(&settings.log_dir, &spec.name)
            }
        };
        let mut overrides = PhaseOverrides::default();
        let mut ledger = RecoveryLedger::new();
        let max_attempts = settings.max_attempts.max(1);
        let mut last_failure: Option<(String, ErrorCategory)> = None;
        let phase_start = Instant::now();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return interrupted(result, &log, ledger);
            }

            let remaining = overrides
                .phase_budget(&spec)
                .saturating_sub(phase_start.elapsed());
            if remaining.is_zero() {
                break;
            }

            result.attempts = attempt;
            let timeout = overrides.effective_timeout(&spec).min(remaining);
            let ctx = PhaseContext {
                spec: spec.clone(),
                attempt,
                timeout,
                overrides: overrides.clone(),
                project_dir: settings.project_dir.clone(),
                artifact_dir: settings.artifact_dir.join(&spec.name),
                cancel: cancel.clone(),
            };

            log_event(
                &log,
                attempt,
                "started",
                &format!(
                    "executor={} timeout_ms={}",
                    executor.name(),
                    timeout.as_millis()
                ),
            );
            if let Some(ref ui) = ui {
                ui.attempt_started(&spec.name, attempt, max_attempts, timeout);
            }

            let outcome = tokio::select! {
                res = tokio::time::timeout(timeout, executor.run(&ctx)) => match res {
                    Ok(res) => res,
                    Err(_) => Err(ToolError::ToolTimeout {
                        tool: executor.name().to_string(),
                        timeout,
                    }),
                },
                _ = cancel.cancelled() => Err(ToolError::Interrupted),
            };

            match outcome {
                Ok(output) => {
                    let score = scoring::phase_score(output.quality, spec.weight);
                    log_event(
                        &log,
                        attempt,
                        "succeeded",
                        &format!("quality={:.3} score={:.2} {}", output.quality, score, output.summary),
                    );
                    result.warnings.extend(output.warnings);
                    result.artifact_paths.extend(output.artifact_paths);
                    if let Err(e) = result.succeed(score, Utc::now()) {
                        error!(error = %e, "Could not record success");
                    }
                    return PhaseCompletion {
                        result,
                        recovery: ledger.into_attempts(),
                    };
                }
                Err(ToolError::Interrupted) => return interrupted(result, &log, ledger),
                Err(err) => {
                    let category = err.category();
                    let message = err.to_string();
                    warn!(attempt, %category, error = %message, "Attempt failed");
                    log_event(&log, attempt, "failed", &format!("{}: {}", err.kind(), message));
                    result
                        .errors
                        .push(format!("[attempt {}] {}: {}", attempt, err.kind(), message));

                    if recovery.enabled && !ledger.already_tried(category) {
                        let missing_tool = match err {
                            ToolError::ToolMissing { ref tool, .. } => Some(tool.as_str()),
                            _ => None,
                        };
                        let applied = recovery.recover(
                            category,
                            &spec,
                            missing_tool,
                            &settings.project_dir,
                            &mut overrides,
                        );
                        log_event(
                            &log,
                            attempt,
                            "recovery",
                            &format!(
                                "{} for {}: {} ({})",
                                applied.strategy_applied, category, applied.outcome, applied.detail
                            ),
                        );
                        if let Some(ref ui) = ui {
                            ui.recovery_applied(&applied);
                        }
                        ledger.record(applied);
                    }

                    last_failure = Some((message, category));

                    if attempt < max_attempts {
                        let remaining = overrides
                            .phase_budget(&spec)
                            .saturating_sub(phase_start.elapsed());
                        if remaining.is_zero() {
                            break;
                        }
                        let delay = backoff_delay(settings.backoff_base, attempt);
                        log_event(
                            &log,
                            attempt,
                            "backoff",
                            &format!("delay_ms={}", delay.as_millis()),
                        );
                        if let Some(ref ui) = ui {
                            ui.attempt_failed(&spec.name, attempt, delay, &err.to_string());
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(delay.min(remaining)) => {}
                            _ = cancel.cancelled() => return interrupted(result, &log, ledger),
                        }
                    }
                }
            }
        }

        let (mut reason, category) =
            last_failure.unwrap_or_else(|| ("no attempt completed".to_string(), ErrorCategory::Unknown));
        if result.attempts < max_attempts {
            let budget = overrides.phase_budget(&spec);
            let note = format!(
                "phase deadline of {:.1}s reached after {} of {} attempts",
                budget.as_secs_f64(),
                result.attempts,
                max_attempts
            );
            log_event(&log, result.attempts, "deadline", &note);
            result.errors.push(note.clone());
            if category != ErrorCategory::Timeout {
                reason = format!("{} ({})", reason, note);
            }
        }
        if ledger.already_tried(category) {
            let exhausted = ToolError::RecoveryExhausted {
                phase: spec.name.clone(),
                category,
            };
            result.errors.push(format!("{}: {}", exhausted.kind(), exhausted));
        }
        log_event(&log, result.attempts, "exhausted", &reason);
        if let Err(e) = result.fail(&reason, Some(category), Utc::now()) {
            error!(error = %e, "Could not record failure");
        }

        PhaseCompletion {
            result,
            recovery: ledger.into_attempts(),
        }
    }
}

fn interrupted(mut result: PhaseResult, log: &PhaseLog, ledger: RecoveryLedger) -> PhaseCompletion {
    log_event(log, result.attempts, "interrupted", "operator interrupt");
    if let Err(e) = result.skip(REASON_INTERRUPTED, Utc::now()) {
        error!(error = %e, "Could not record interrupt");
    }
    PhaseCompletion {
        result,
        recovery: ledger.into_attempts(),
    }
}

fn log_event(log: &PhaseLog, attempt: u32, event: &str, detail: &str) {
    if let Err(e) = log.append(attempt, event, detail) {
        warn!(path = %log.path().display(), error = %e, "Failed to append phase log");
    }
}
