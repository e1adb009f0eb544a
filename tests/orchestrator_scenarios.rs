//! End-to-end orchestrator scenarios with scripted in-process executors.

use async_trait::async_trait;
use gauntlet::errors::{ErrorCategory, ToolError};
use gauntlet::executor::{ExecutorRegistry, PhaseContext, PhaseExecutor, PhaseOutput, ToolExecutor};
use gauntlet::gauntlet_config::{ExecutorDef, ExecutorKind, RecoverySection};
use gauntlet::orchestrator::{Orchestrator, PhaseStatus, RunConfigSnapshot, RunSettings};
use gauntlet::phase::{PhaseRegistry, PhaseSpec};
use gauntlet::recovery::{RecoveryOutcome, RecoveryPolicy};
use gauntlet::scoring::{ReadinessTier, ScoringModel, TierRule};
use gauntlet::tool::ToolPaths;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Behavior {
    Succeed(f64),
    Fail(ErrorCategory),
    /// Fail the first N calls, then succeed
    FailTimes(u32),
    Sleep(Duration),
    Panic,
}

/// Shared observations across every scripted executor in a scenario.
#[derive(Default)]
struct Observer {
    active: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<String>>,
    heaps: Mutex<Vec<Option<u64>>>,
    starts: Mutex<Vec<Instant>>,
}

impl Observer {
    fn event(&self, e: String) {
        self.events.lock().unwrap().push(e);
    }

    fn position(&self, e: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .position(|x| x == e)
            .unwrap_or_else(|| panic!("event '{}' not recorded", e))
    }
}

struct Scripted {
    name: String,
    behavior: Behavior,
    calls: AtomicU32,
    observer: Arc<Observer>,
}

#[async_trait]
impl PhaseExecutor for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutput, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer.starts.lock().unwrap().push(Instant::now());
        self.observer.heaps.lock().unwrap().push(ctx.overrides.heap_mb);
        self.observer.event(format!("{}:start", ctx.spec.name));

        let now = self.observer.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = match self.behavior {
            Behavior::Succeed(quality) => Ok(PhaseOutput::with_quality(quality)),
            Behavior::Fail(category) => Err(ToolError::ToolExecution {
                tool: self.name.clone(),
                exit_code: 1,
                reason: format!("scripted {} failure", category),
                category,
            }),
            Behavior::FailTimes(n) if call <= n => Err(ToolError::ToolExecution {
                tool: self.name.clone(),
                exit_code: 1,
                reason: "flaky".to_string(),
                category: ErrorCategory::Unknown,
            }),
            Behavior::FailTimes(_) => Ok(PhaseOutput::with_quality(1.0)),
            Behavior::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(PhaseOutput::with_quality(1.0))
            }
            Behavior::Panic => panic!("scripted executor panic"),
        };

        self.observer.active.fetch_sub(1, Ordering::SeqCst);
        self.observer.event(format!("{}:end", ctx.spec.name));
        outcome
    }
}

struct Scenario {
    dir: TempDir,
    specs: Vec<PhaseSpec>,
    behaviors: Vec<(String, Behavior)>,
    tools: Vec<(String, ExecutorDef)>,
    search_dirs: Vec<PathBuf>,
    observer: Arc<Observer>,
    max_attempts: u32,
    jobs: usize,
    continue_on_error: bool,
    backoff: Duration,
    scoring: Option<ScoringModel>,
}

impl Scenario {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            specs: Vec::new(),
            behaviors: Vec::new(),
            tools: Vec::new(),
            search_dirs: Vec::new(),
            observer: Arc::new(Observer::default()),
            max_attempts: 1,
            jobs: 1,
            continue_on_error: true,
            backoff: Duration::from_millis(1),
            scoring: None,
        }
    }

    /// Add a phase backed by its own scripted executor.
    fn phase(mut self, spec: PhaseSpec, behavior: Behavior) -> Self {
        self.behaviors.push((spec.executor.clone(), behavior));
        self.specs.push(spec);
        self
    }

    /// Add a phase backed by a real tool executor.
    fn tool_phase(mut self, spec: PhaseSpec, def: ExecutorDef) -> Self {
        self.tools.push((spec.executor.clone(), def));
        self.specs.push(spec);
        self
    }

    /// Restrict missing-tool recovery to these directories.
    fn search_dir(mut self, dir: &Path) -> Self {
        self.search_dirs.push(dir.to_path_buf());
        self
    }

    fn backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    fn attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    fn jobs(mut self, n: usize) -> Self {
        self.jobs = n;
        self
    }

    fn halt_on_error(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    fn scoring(mut self, model: ScoringModel) -> Self {
        self.scoring = Some(model);
        self
    }

    fn build(&self) -> Orchestrator {
        let max_score: u32 = self.specs.iter().map(|s| s.weight).sum();
        let scoring = self.scoring.clone().unwrap_or_else(|| {
            ScoringModel::new(
                vec![TierRule::new(ReadinessTier::Ready, max_score as f64, 0)],
                max_score,
                0.8,
            )
        });

        let mut defs = BTreeMap::new();
        let mut executors = ExecutorRegistry::new();
        for (name, behavior) in &self.behaviors {
            defs.insert(name.clone(), ExecutorDef::new(ExecutorKind::Command, "true", &[]));
            executors.insert(
                name,
                Arc::new(Scripted {
                    name: name.clone(),
                    behavior: behavior.clone(),
                    calls: AtomicU32::new(0),
                    observer: Arc::clone(&self.observer),
                }),
            );
        }
        for (name, def) in &self.tools {
            defs.insert(name.clone(), def.clone());
            let executor = ToolExecutor::new(name, def.clone(), &ToolPaths::default()).unwrap();
            executors.insert(name, Arc::new(executor));
        }
        let registry = PhaseRegistry::new(self.specs.clone(), defs, scoring.max_score).unwrap();

        let root = self.dir.path();
        let settings = RunSettings {
            continue_on_error: self.continue_on_error,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff,
            jobs: self.jobs,
            project_dir: root.to_path_buf(),
            log_dir: root.join("logs"),
            artifact_dir: root.join("artifacts"),
            scoring: scoring.clone(),
            snapshot: RunConfigSnapshot {
                continue_on_error: self.continue_on_error,
                max_retries: self.max_attempts,
                backoff_base_ms: self.backoff.as_millis() as u64,
                timeout_secs: 1800,
                jobs: self.jobs,
                timeout_policy: "halve".to_string(),
                scoring,
            },
        };
        let mut recovery = RecoveryPolicy::from_config(&RecoverySection::default());
        recovery.search_dirs = self.search_dirs.clone();

        Orchestrator::new(registry, executors, recovery, settings).unwrap()
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn spec(name: &str, weight: u32) -> PhaseSpec {
    PhaseSpec::new(name, &format!("{}_exec", name), weight)
}

#[tokio::test]
async fn test_six_of_eight_is_conditional() {
    let model = ScoringModel::new(
        vec![
            TierRule::new(ReadinessTier::Ready, 750.0, 0),
            TierRule::new(ReadinessTier::Conditional, 500.0, 2),
        ],
        800,
        0.8,
    );
    let mut scenario = Scenario::new().scoring(model);
    for i in 1..=8 {
        let behavior = if i == 3 || i == 7 {
            Behavior::Fail(ErrorCategory::Unknown)
        } else {
            Behavior::Succeed(1.0)
        };
        scenario = scenario.phase(spec(&format!("p{}", i), 100), behavior);
    }

    let run = scenario.build().run().await.unwrap();

    assert_eq!(run.overall_score, 600.0);
    assert_eq!(run.failed_count(), 2);
    assert_eq!(run.readiness_tier, ReadinessTier::Conditional);
    assert_eq!(run.readiness_tier.exit_code(), 2);
    assert!(run.all_terminal());
    assert!(run.phases.iter().all(|p| p.status != PhaseStatus::Failed || p.score == 0.0));
}

#[tokio::test]
async fn test_stress_retries_without_duplicate_recovery() {
    let scenario = Scenario::new()
        .attempts(2)
        .phase(spec("stress", 100), Behavior::Fail(ErrorCategory::OutOfMemory));

    let run = scenario.build().run().await.unwrap();
    let stress = run.phase("stress").unwrap();

    assert_eq!(stress.status, PhaseStatus::Failed);
    assert_eq!(stress.attempts, 2);
    assert_eq!(stress.error_category, Some(ErrorCategory::OutOfMemory));
    assert!(stress.reason.as_deref().unwrap().contains("scripted"));

    assert_eq!(run.recovery_attempts.len(), 1);
    let attempt = &run.recovery_attempts[0];
    assert_eq!(attempt.phase, "stress");
    assert_eq!(attempt.strategy_applied, "raise_heap");
    assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);

    // The second attempt ran with the raised heap.
    let heaps = scenario.observer.heaps.lock().unwrap().clone();
    assert_eq!(heaps, vec![None, Some(6144)]);

    assert!(stress.errors.iter().any(|e| e.starts_with("RecoveryExhaustedError")));
}

#[tokio::test]
async fn test_halt_skips_remaining_phases() {
    let mut scenario = Scenario::new().halt_on_error();
    for i in 1..=8 {
        let behavior = if i == 3 {
            Behavior::Fail(ErrorCategory::Unknown)
        } else {
            Behavior::Succeed(1.0)
        };
        scenario = scenario.phase(spec(&format!("p{}", i), 100), behavior);
    }

    let run = scenario.build().run().await.unwrap();

    assert!(run.halted);
    assert_eq!(run.executed_count(), 3);
    assert_eq!(run.total_count(), 8);
    assert_eq!(run.phase("p3").unwrap().status, PhaseStatus::Failed);
    for i in 4..=8 {
        let p = run.phase(&format!("p{}", i)).unwrap();
        assert_eq!(p.status, PhaseStatus::Skipped);
        assert_eq!(p.reason.as_deref(), Some("run halted"));
        assert_eq!(p.attempts, 0);
    }
    assert_eq!(run.overall_score, 200.0);
}

#[tokio::test]
async fn test_timeout_is_enforced() {
    let scenario = Scenario::new().phase(
        spec("slow", 100).with_timeout(Duration::from_millis(200)),
        Behavior::Sleep(Duration::from_secs(30)),
    );

    let started = Instant::now();
    let run = scenario.build().run().await.unwrap();
    let elapsed = started.elapsed();

    let slow = run.phase("slow").unwrap();
    assert_eq!(slow.status, PhaseStatus::Failed);
    assert_eq!(slow.error_category, Some(ErrorCategory::Timeout));
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_retry_until_success() {
    let scenario = Scenario::new()
        .attempts(3)
        .phase(spec("flaky", 100), Behavior::FailTimes(2));

    let run = scenario.build().run().await.unwrap();
    let flaky = run.phase("flaky").unwrap();

    assert_eq!(flaky.status, PhaseStatus::Success);
    assert_eq!(flaky.attempts, 3);
    assert_eq!(flaky.errors.len(), 2);
    assert_eq!(flaky.score, 100.0);
    // Unknown failures are recorded once with no strategy.
    assert_eq!(run.recovery_attempts.len(), 1);
    assert_eq!(run.recovery_attempts[0].strategy_applied, "none");
}

#[tokio::test]
async fn test_interrupt_preserves_finished_phases() {
    let scenario = Scenario::new()
        .phase(spec("first", 100), Behavior::Succeed(1.0))
        .phase(spec("second", 100), Behavior::Sleep(Duration::from_secs(30)))
        .phase(spec("third", 100), Behavior::Succeed(1.0));

    let token = CancellationToken::new();
    let orchestrator = scenario.build().with_cancellation(token.clone());
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let run = orchestrator.run().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(run.interrupted);
    assert!(run.all_terminal());
    assert_eq!(run.phase("first").unwrap().status, PhaseStatus::Success);
    assert_eq!(run.phase("first").unwrap().score, 100.0);

    let second = run.phase("second").unwrap();
    assert_eq!(second.status, PhaseStatus::Skipped);
    assert_eq!(second.reason.as_deref(), Some("interrupted"));

    let third = run.phase("third").unwrap();
    assert_eq!(third.status, PhaseStatus::Skipped);
    assert_eq!(third.reason.as_deref(), Some("run interrupted"));
    assert_eq!(third.attempts, 0);
}

#[tokio::test]
async fn test_failed_dependency_skips_dependent() {
    let scenario = Scenario::new()
        .phase(spec("build", 100), Behavior::Fail(ErrorCategory::Unknown))
        .phase(spec("tests", 100).with_dependency("build"), Behavior::Succeed(1.0))
        .phase(spec("bench", 100).with_dependency("tests"), Behavior::Succeed(1.0))
        .phase(spec("lint", 100), Behavior::Succeed(1.0));

    let run = scenario.build().run().await.unwrap();

    assert_eq!(run.phase("tests").unwrap().reason.as_deref(), Some("dependency not satisfied"));
    assert_eq!(run.phase("bench").unwrap().reason.as_deref(), Some("dependency not satisfied"));
    assert_eq!(run.phase("lint").unwrap().status, PhaseStatus::Success);
    assert!(!run.halted);
}

#[tokio::test]
async fn test_parallel_jobs_respect_limit_and_dependencies() {
    let scenario = Scenario::new()
        .jobs(2)
        .phase(spec("a", 100), Behavior::Sleep(Duration::from_millis(300)))
        .phase(spec("b", 100), Behavior::Sleep(Duration::from_millis(300)))
        .phase(spec("c", 100), Behavior::Sleep(Duration::from_millis(300)))
        .phase(spec("d", 100).with_dependency("a"), Behavior::Succeed(1.0));

    let run = scenario.build().run().await.unwrap();

    assert!(run.all_terminal());
    assert_eq!(run.passed_count(), 4);
    assert_eq!(scenario.observer.peak.load(Ordering::SeqCst), 2);
    assert!(scenario.observer.position("d:start") > scenario.observer.position("a:end"));
}

#[tokio::test]
async fn test_sequential_by_default() {
    let scenario = Scenario::new()
        .phase(spec("a", 100), Behavior::Sleep(Duration::from_millis(50)))
        .phase(spec("b", 100), Behavior::Sleep(Duration::from_millis(50)));

    scenario.build().run().await.unwrap();

    assert_eq!(scenario.observer.peak.load(Ordering::SeqCst), 1);
    assert!(scenario.observer.position("b:start") > scenario.observer.position("a:end"));
}

#[tokio::test]
async fn test_panicking_executor_fails_phase() {
    let scenario = Scenario::new()
        .phase(spec("boom", 100), Behavior::Panic)
        .phase(spec("after", 100), Behavior::Succeed(1.0));

    let run = scenario.build().run().await.unwrap();

    let boom = run.phase("boom").unwrap();
    assert_eq!(boom.status, PhaseStatus::Failed);
    assert_eq!(boom.reason.as_deref(), Some("executor panicked"));
    assert_eq!(run.phase("after").unwrap().status, PhaseStatus::Success);
}

#[tokio::test]
async fn test_disabled_phase_is_skipped_with_reason() {
    let scenario = Scenario::new()
        .phase(spec("on", 100), Behavior::Succeed(1.0))
        .phase(spec("off", 100).disabled("disabled by --skip-stress"), Behavior::Succeed(1.0));

    let run = scenario.build().run().await.unwrap();

    let off = run.phase("off").unwrap();
    assert_eq!(off.status, PhaseStatus::Skipped);
    assert_eq!(off.reason.as_deref(), Some("disabled"));
    assert_eq!(off.warnings, vec!["disabled by --skip-stress".to_string()]);
    assert_eq!(off.attempts, 0);
}

#[tokio::test]
async fn test_partial_quality_scores_proportionally() {
    let scenario = Scenario::new()
        .phase(spec("unit", 200), Behavior::Succeed(0.75))
        .phase(spec("proofs", 100), Behavior::Succeed(1.5));

    let run = scenario.build().run().await.unwrap();

    assert_eq!(run.phase("unit").unwrap().score, 150.0);
    // Clamped to the weight.
    assert_eq!(run.phase("proofs").unwrap().score, 100.0);
    assert_eq!(run.overall_score, 250.0);
    assert!(run.overall_score <= run.max_score as f64);
}

#[tokio::test]
async fn test_phase_log_records_attempts() {
    let scenario = Scenario::new()
        .attempts(2)
        .phase(spec("flaky", 100), Behavior::FailTimes(1));

    scenario.build().run().await.unwrap();

    let log = gauntlet::orchestrator::PhaseLog::new(&scenario.root().join("logs"), "flaky");
    let events: Vec<String> = log.entries().unwrap().into_iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec!["run", "started", "failed", "recovery", "backoff", "started", "succeeded"]
    );
}

fn phase_log_details(root: &Path, phase: &str, event: &str) -> Vec<String> {
    gauntlet::orchestrator::PhaseLog::new(&root.join("logs"), phase)
        .entries()
        .unwrap()
        .into_iter()
        .filter(|e| e.event == event)
        .map(|e| e.detail)
        .collect()
}

#[tokio::test]
async fn test_timeout_bounds_the_whole_phase_across_retries() {
    let scenario = Scenario::new()
        .attempts(3)
        .phase(
            spec("hang", 100).with_timeout(Duration::from_millis(500)),
            Behavior::Sleep(Duration::from_secs(3600)),
        );

    let started = Instant::now();
    let run = scenario.build().run().await.unwrap();
    let elapsed = started.elapsed();

    let hang = run.phase("hang").unwrap();
    assert_eq!(hang.status, PhaseStatus::Failed);
    assert_eq!(hang.error_category, Some(ErrorCategory::Timeout));
    assert_eq!(hang.attempts, 1);
    assert!(hang.errors.iter().any(|e| e.contains("phase deadline")));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1200), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_deadline_cuts_backoff_and_stops_retrying() {
    let scenario = Scenario::new()
        .attempts(5)
        .backoff(Duration::from_millis(200))
        .phase(
            spec("flaky", 100).with_timeout(Duration::from_millis(300)),
            Behavior::Fail(ErrorCategory::Unknown),
        );

    let started = Instant::now();
    let run = scenario.build().run().await.unwrap();
    let elapsed = started.elapsed();

    let flaky = run.phase("flaky").unwrap();
    assert_eq!(flaky.status, PhaseStatus::Failed);
    assert!(flaky.attempts < 5, "ran {} attempts", flaky.attempts);
    assert!(flaky.reason.as_deref().unwrap().contains("phase deadline"));
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_retry_delays_are_non_decreasing() {
    let base = Duration::from_millis(40);
    let scenario = Scenario::new()
        .attempts(4)
        .backoff(base)
        .phase(spec("stress", 100), Behavior::Fail(ErrorCategory::Unknown));

    let run = scenario.build().run().await.unwrap();
    assert_eq!(run.phase("stress").unwrap().attempts, 4);

    let delays: Vec<u64> = phase_log_details(scenario.root(), "stress", "backoff")
        .iter()
        .map(|d| d.trim_start_matches("delay_ms=").parse().unwrap())
        .collect();
    assert_eq!(delays, vec![40, 80, 120]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));

    let starts = scenario.observer.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 4);
    for (i, pair) in starts.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        assert!(gap >= base * (i as u32 + 1), "gap {} was {:?}", i + 1, gap);
    }
}

#[cfg(unix)]
fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_shell_command_is_not_rebound_to_executor_name() {
    let alt = TempDir::new().unwrap();
    install_script(alt.path(), "mc", "echo decoy");

    let def = ExecutorDef::new(ExecutorKind::Command, "sh", &["-c", "gauntlet-tlc-not-installed"]);
    let scenario = Scenario::new()
        .attempts(2)
        .backoff(Duration::ZERO)
        .search_dir(alt.path())
        .tool_phase(PhaseSpec::new("model_check", "mc", 100), def);

    let run = scenario.build().run().await.unwrap();
    let phase = run.phase("model_check").unwrap();

    assert_eq!(phase.status, PhaseStatus::Failed);
    assert_eq!(phase.score, 0.0);
    assert_eq!(phase.error_category, Some(ErrorCategory::ToolMissing));
    assert_eq!(run.recovery_attempts.len(), 1);
    let attempt = &run.recovery_attempts[0];
    assert_eq!(attempt.strategy_applied, "relocate_tool");
    assert_eq!(attempt.outcome, RecoveryOutcome::Unresolved);
    assert!(attempt.detail.contains("gauntlet-tlc-not-installed"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_shell_command_relocated_then_passes() {
    let alt = TempDir::new().unwrap();
    install_script(alt.path(), "gauntlet-relocated-tool", "echo relocated-ok");

    let mut def = ExecutorDef::new(ExecutorKind::Command, "sh", &["-c", "gauntlet-relocated-tool"]);
    def.success_marker = Some("relocated-ok".to_string());
    let scenario = Scenario::new()
        .attempts(2)
        .backoff(Duration::ZERO)
        .search_dir(alt.path())
        .tool_phase(PhaseSpec::new("model_check", "mc", 100), def);

    let run = scenario.build().run().await.unwrap();
    let phase = run.phase("model_check").unwrap();

    assert_eq!(phase.status, PhaseStatus::Success);
    assert_eq!(phase.attempts, 2);
    assert_eq!(run.recovery_attempts.len(), 1);
    assert_eq!(run.recovery_attempts[0].error_category, ErrorCategory::ToolMissing);
    assert_eq!(run.recovery_attempts[0].outcome, RecoveryOutcome::Resolved);
}

#[tokio::test]
async fn test_test_suite_without_summary_fails_phase() {
    let def = ExecutorDef::new(ExecutorKind::TestSuite, "sh", &["-c", "echo compiled"]);
    let scenario = Scenario::new().tool_phase(PhaseSpec::new("unit_tests", "unit", 100), def);

    let run = scenario.build().run().await.unwrap();
    let phase = run.phase("unit_tests").unwrap();

    assert_eq!(phase.status, PhaseStatus::Failed);
    assert_eq!(phase.score, 0.0);
    assert!(phase.errors[0].contains("OutputParseError"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_marker_printed_before_background_child_is_kept() {
    let mut def = ExecutorDef::new(ExecutorKind::Command, "sh", &["-c", "echo bench-done; sleep 20 &"]);
    def.success_marker = Some("bench-done".to_string());
    let scenario = Scenario::new().tool_phase(PhaseSpec::new("performance", "bench", 100), def);

    let started = Instant::now();
    let run = scenario.build().run().await.unwrap();

    assert_eq!(run.phase("performance").unwrap().status, PhaseStatus::Success);
    assert!(started.elapsed() < Duration::from_secs(10));
}
