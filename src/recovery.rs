//! Category-keyed recovery strategies.
//!
//! This module provides:
//! - `RecoveryAttempt`, the auditable record of one strategy application
//! - `PhaseOverrides`, the adjustments a strategy leaves behind for later attempts
//! - `RecoveryPolicy`, which maps an `ErrorCategory` to a remediation
//! - `RecoveryLedger`, which enforces one attempt per (phase, category)

use crate::errors::ErrorCategory;
use crate::gauntlet_config::{RecoverySection, TimeoutPolicy};
use crate::phase::PhaseSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether a strategy believes it fixed the precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Resolved,
    Unresolved,
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryOutcome::Resolved => write!(f, "resolved"),
            RecoveryOutcome::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// One auditable recovery decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub phase: String,
    pub error_category: ErrorCategory,
    pub strategy_applied: String,
    pub outcome: RecoveryOutcome,
    #[serde(default)]
    pub detail: String,
}

/// Adjustments applied to every later attempt of one phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOverrides {
    /// Tools found outside `PATH`, keyed by binary name
    pub relocated: BTreeMap<String, PathBuf>,
    pub timeout: Option<Duration>,
    pub heap_mb: Option<u64>,
}

impl PhaseOverrides {
    pub fn effective_timeout(&self, spec: &PhaseSpec) -> Duration {
        self.timeout.unwrap_or(spec.timeout)
    }

    /// Wall-clock budget for the whole phase, retries and backoff included.
    /// Only an extended timeout grows it past the configured value.
    pub fn phase_budget(&self, spec: &PhaseSpec) -> Duration {
        self.effective_timeout(spec).max(spec.timeout)
    }

    /// The program to spawn for `program`, honoring relocated tools.
    pub fn program_for(&self, program: &str) -> PathBuf {
        self.relocated
            .get(&binary_name(program))
            .cloned()
            .unwrap_or_else(|| PathBuf::from(program))
    }

    /// Environment handed to the subprocess. Directories of relocated tools
    /// go in front of `PATH` so tools launched through a shell find them too.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(heap) = self.heap_mb {
            env.insert("JAVA_OPTS".to_string(), format!("-Xmx{}m", heap));
            env.insert("GAUNTLET_HEAP_MB".to_string(), heap.to_string());
        }
        if !self.relocated.is_empty() {
            let mut dirs: Vec<PathBuf> = Vec::new();
            for dir in self.relocated.values().filter_map(|p| p.parent()) {
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
            }
            if let Some(existing) = std::env::var_os("PATH") {
                dirs.extend(std::env::split_paths(&existing));
            }
            match std::env::join_paths(dirs) {
                Ok(path) => {
                    env.insert("PATH".to_string(), path.to_string_lossy().into_owned());
                }
                Err(e) => warn!(error = %e, "Could not extend PATH for relocated tools"),
            }
        }
        env
    }
}

/// Strategy selection and tuning, built from `[recovery]`.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub enabled: bool,
    pub timeout_policy: TimeoutPolicy,
    pub timeout_floor: Duration,
    pub timeout_factor: f64,
    pub timeout_ceiling: Duration,
    pub base_heap_mb: u64,
    pub heap_increment_mb: u64,
    /// Directories searched, in order, for a missing tool
    pub search_dirs: Vec<PathBuf>,
}

impl RecoveryPolicy {
    pub fn from_config(section: &RecoverySection) -> Self {
        let mut search_dirs = section.search_paths.clone();
        search_dirs.extend(default_search_dirs());
        Self {
            enabled: section.enabled,
            timeout_policy: section.timeout_policy,
            timeout_floor: Duration::from_secs(section.timeout_floor_secs),
            timeout_factor: section.timeout_factor,
            timeout_ceiling: Duration::from_secs(section.timeout_ceiling_secs),
            base_heap_mb: section.base_heap_mb,
            heap_increment_mb: section.heap_increment_mb,
            search_dirs,
        }
    }

    /// Apply the strategy for `category` and return the attempt record.
    ///
    /// `missing_tool` names the binary that was not found, when known.
    pub fn recover(
        &self,
        category: ErrorCategory,
        spec: &PhaseSpec,
        missing_tool: Option<&str>,
        project_dir: &Path,
        overrides: &mut PhaseOverrides,
    ) -> RecoveryAttempt {
        let (strategy, outcome, detail) = match category {
            ErrorCategory::ToolMissing => self.relocate_tool(missing_tool, overrides),
            ErrorCategory::Timeout => self.adjust_timeout(spec, overrides),
            ErrorCategory::OutOfMemory => self.raise_heap(overrides),
            ErrorCategory::StaleCache => clear_cache(spec, project_dir),
            ErrorCategory::Unknown => (
                "none",
                RecoveryOutcome::Unresolved,
                "no strategy for unknown failures".to_string(),
            ),
        };

        match outcome {
            RecoveryOutcome::Resolved => {
                info!(phase = %spec.name, %category, strategy, %detail, "Recovery resolved")
            }
            RecoveryOutcome::Unresolved => {
                warn!(phase = %spec.name, %category, strategy, %detail, "Recovery unresolved")
            }
        }

        RecoveryAttempt {
            phase: spec.name.clone(),
            error_category: category,
            strategy_applied: strategy.to_string(),
            outcome,
            detail,
        }
    }

    fn relocate_tool(
        &self,
        program: Option<&str>,
        overrides: &mut PhaseOverrides,
    ) -> (&'static str, RecoveryOutcome, String) {
        let Some(program) = program else {
            return (
                "relocate_tool",
                RecoveryOutcome::Unresolved,
                "missing tool name is unknown".to_string(),
            );
        };
        let name = binary_name(program);

        for dir in &self.search_dirs {
            let candidate = dir.join(&name);
            debug!(candidate = %candidate.display(), "Probing for tool");
            if is_executable(&candidate) {
                let detail = format!("rebound {} to {}", name, candidate.display());
                overrides.relocated.insert(name.clone(), candidate);
                return ("relocate_tool", RecoveryOutcome::Resolved, detail);
            }
        }

        (
            "relocate_tool",
            RecoveryOutcome::Unresolved,
            format!("{} not found in {} locations", name, self.search_dirs.len()),
        )
    }

    fn adjust_timeout(
        &self,
        spec: &PhaseSpec,
        overrides: &mut PhaseOverrides,
    ) -> (&'static str, RecoveryOutcome, String) {
        let current = overrides.effective_timeout(spec);
        // Short phases can always be halved once.
        let floor = self.timeout_floor.min(spec.timeout / 2);
        let (strategy, next) = match self.timeout_policy {
            TimeoutPolicy::Halve if current <= floor => ("halve_timeout", current),
            TimeoutPolicy::Halve => ("halve_timeout", (current / 2).max(floor)),
            TimeoutPolicy::Extend if current >= self.timeout_ceiling => ("extend_timeout", current),
            TimeoutPolicy::Extend => (
                "extend_timeout",
                current
                    .mul_f64(self.timeout_factor.max(1.0))
                    .min(self.timeout_ceiling),
            ),
        };

        if next == current {
            return (
                strategy,
                RecoveryOutcome::Unresolved,
                format!("timeout already at bound ({:.1}s)", current.as_secs_f64()),
            );
        }

        overrides.timeout = Some(next);
        (
            strategy,
            RecoveryOutcome::Resolved,
            format!("timeout {:.1}s -> {:.1}s", current.as_secs_f64(), next.as_secs_f64()),
        )
    }

    fn raise_heap(&self, overrides: &mut PhaseOverrides) -> (&'static str, RecoveryOutcome, String) {
        let current = overrides.heap_mb.unwrap_or(self.base_heap_mb);
        let next = current + self.heap_increment_mb;
        overrides.heap_mb = Some(next);
        (
            "raise_heap",
            RecoveryOutcome::Resolved,
            format!("heap {}MB -> {}MB", current, next),
        )
    }
}

fn clear_cache(spec: &PhaseSpec, project_dir: &Path) -> (&'static str, RecoveryOutcome, String) {
    let Some(ref cache_dir) = spec.cache_dir else {
        return (
            "clear_cache",
            RecoveryOutcome::Unresolved,
            "phase has no cache directory".to_string(),
        );
    };

    let path = if cache_dir.is_absolute() {
        cache_dir.clone()
    } else {
        project_dir.join(cache_dir)
    };

    if !path.exists() {
        return (
            "clear_cache",
            RecoveryOutcome::Unresolved,
            format!("{} does not exist", path.display()),
        );
    }

    match std::fs::remove_dir_all(&path) {
        Ok(()) => (
            "clear_cache",
            RecoveryOutcome::Resolved,
            format!("removed {}", path.display()),
        ),
        Err(e) => (
            "clear_cache",
            RecoveryOutcome::Unresolved,
            format!("failed to remove {}: {}", path.display(), e),
        ),
    }
}

fn binary_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string())
}

/// Well-known install locations, in search order.
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local/bin"));
        candidates.push(home.join(".cargo/bin"));
    }
    if let Ok(paths) = glob::glob("/opt/*/bin") {
        candidates.extend(paths.flatten());
    }
    candidates
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Tracks which categories have already been recovered for one phase.
#[derive(Debug, Default)]
pub struct RecoveryLedger {
    tried: HashSet<ErrorCategory>,
    attempts: Vec<RecoveryAttempt>,
}

impl RecoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_tried(&self, category: ErrorCategory) -> bool {
        self.tried.contains(&category)
    }

    pub fn record(&mut self, attempt: RecoveryAttempt) {
        self.tried.insert(attempt.error_category);
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[RecoveryAttempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<RecoveryAttempt> {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy_with(dirs: Vec<PathBuf>) -> RecoveryPolicy {
        let mut policy = RecoveryPolicy::from_config(&RecoverySection::default());
        policy.search_dirs = dirs;
        policy
    }

    fn spec() -> PhaseSpec {
        PhaseSpec::new("model_check", "model_checker", 150).with_timeout(Duration::from_secs(100))
    }

    #[test]
    fn test_timeout_halves_down_to_floor() {
        let policy = policy_with(vec![]);
        let mut overrides = PhaseOverrides::default();

        let attempt = policy.recover(ErrorCategory::Timeout, &spec(), Some("tlc"), Path::new("."), &mut overrides);
        assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
        assert_eq!(attempt.strategy_applied, "halve_timeout");
        assert_eq!(overrides.timeout, Some(Duration::from_secs(50)));

        overrides.timeout = Some(Duration::from_secs(40));
        policy.recover(ErrorCategory::Timeout, &spec(), Some("tlc"), Path::new("."), &mut overrides);
        assert_eq!(overrides.timeout, Some(Duration::from_secs(30)));

        let at_floor =
            policy.recover(ErrorCategory::Timeout, &spec(), Some("tlc"), Path::new("."), &mut overrides);
        assert_eq!(at_floor.outcome, RecoveryOutcome::Unresolved);
    }

    #[test]
    fn test_short_timeout_halves_below_global_floor() {
        let policy = policy_with(vec![]);
        let short = PhaseSpec::new("smoke", "build", 10).with_timeout(Duration::from_millis(500));
        let mut overrides = PhaseOverrides::default();

        let attempt = policy.recover(ErrorCategory::Timeout, &short, None, Path::new("."), &mut overrides);
        assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
        assert_eq!(overrides.timeout, Some(Duration::from_millis(250)));

        let again = policy.recover(ErrorCategory::Timeout, &short, None, Path::new("."), &mut overrides);
        assert_eq!(again.outcome, RecoveryOutcome::Unresolved);
        assert_eq!(overrides.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_timeout_extend_respects_ceiling() {
        let mut policy = policy_with(vec![]);
        policy.timeout_policy = TimeoutPolicy::Extend;
        policy.timeout_ceiling = Duration::from_secs(150);
        let mut overrides = PhaseOverrides::default();

        policy.recover(ErrorCategory::Timeout, &spec(), Some("tlc"), Path::new("."), &mut overrides);
        assert_eq!(overrides.timeout, Some(Duration::from_secs(150)));
    }

    #[test]
    fn test_phase_budget_grows_only_when_extended() {
        let spec = spec();
        let mut overrides = PhaseOverrides::default();
        assert_eq!(overrides.phase_budget(&spec), Duration::from_secs(100));

        overrides.timeout = Some(Duration::from_secs(50));
        assert_eq!(overrides.phase_budget(&spec), Duration::from_secs(100));

        overrides.timeout = Some(Duration::from_secs(200));
        assert_eq!(overrides.phase_budget(&spec), Duration::from_secs(200));
    }

    #[test]
    fn test_oom_raises_heap_and_exports_env() {
        let policy = policy_with(vec![]);
        let mut overrides = PhaseOverrides::default();
        let attempt =
            policy.recover(ErrorCategory::OutOfMemory, &spec(), Some("tlc"), Path::new("."), &mut overrides);
        assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
        assert_eq!(overrides.heap_mb, Some(6144));
        let env = overrides.env();
        assert_eq!(env["JAVA_OPTS"], "-Xmx6144m");
        assert_eq!(env["GAUNTLET_HEAP_MB"], "6144");
    }

    #[test]
    fn test_stale_cache_removes_directory() {
        let project = tempdir().unwrap();
        let cache = project.path().join("states");
        std::fs::create_dir_all(cache.join("run-1")).unwrap();
        let spec = spec().with_cache_dir("states");

        let policy = policy_with(vec![]);
        let attempt = policy.recover(
            ErrorCategory::StaleCache,
            &spec,
            Some("tlc"),
            project.path(),
            &mut PhaseOverrides::default(),
        );
        assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
        assert!(!cache.exists());
    }

    #[test]
    fn test_stale_cache_without_directory_is_unresolved() {
        let policy = policy_with(vec![]);
        let attempt = policy.recover(
            ErrorCategory::StaleCache,
            &spec(),
            Some("tlc"),
            Path::new("."),
            &mut PhaseOverrides::default(),
        );
        assert_eq!(attempt.outcome, RecoveryOutcome::Unresolved);
    }

    #[cfg(unix)]
    #[test]
    fn test_tool_missing_rebinds_to_found_binary() {
        use std::os::unix::fs::PermissionsExt;

        let alt = tempdir().unwrap();
        let tool = alt.path().join("gauntlet-fake-tlc");
        std::fs::write(&tool, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let policy = policy_with(vec![PathBuf::from("/nonexistent"), alt.path().to_path_buf()]);
        let mut overrides = PhaseOverrides::default();
        let attempt = policy.recover(
            ErrorCategory::ToolMissing,
            &spec(),
            Some("gauntlet-fake-tlc"),
            Path::new("."),
            &mut overrides,
        );
        assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
        assert_eq!(overrides.relocated.get("gauntlet-fake-tlc"), Some(&tool));
        assert_eq!(overrides.program_for("gauntlet-fake-tlc"), tool);
        assert_eq!(overrides.program_for("sh"), PathBuf::from("sh"));
        let path = overrides.env()["PATH"].clone();
        assert!(path.starts_with(&alt.path().to_string_lossy().to_string()));
    }

    #[test]
    fn test_tool_missing_unresolved_when_absent() {
        let empty = tempdir().unwrap();
        let policy = policy_with(vec![empty.path().to_path_buf()]);
        let mut overrides = PhaseOverrides::default();
        let attempt = policy.recover(
            ErrorCategory::ToolMissing,
            &spec(),
            Some("gauntlet-no-such-tool"),
            Path::new("."),
            &mut overrides,
        );
        assert_eq!(attempt.outcome, RecoveryOutcome::Unresolved);
        assert!(overrides.relocated.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_tool_missing_without_name_does_not_rebind() {
        use std::os::unix::fs::PermissionsExt;

        let alt = tempdir().unwrap();
        let decoy = alt.path().join("model_checker");
        std::fs::write(&decoy, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&decoy, std::fs::Permissions::from_mode(0o755)).unwrap();

        let policy = policy_with(vec![alt.path().to_path_buf()]);
        let mut overrides = PhaseOverrides::default();
        let attempt = policy.recover(
            ErrorCategory::ToolMissing,
            &spec(),
            None,
            Path::new("."),
            &mut overrides,
        );
        assert_eq!(attempt.outcome, RecoveryOutcome::Unresolved);
        assert!(overrides.relocated.is_empty());
    }

    #[test]
    fn test_unknown_has_no_strategy() {
        let policy = policy_with(vec![]);
        let attempt = policy.recover(
            ErrorCategory::Unknown,
            &spec(),
            Some("tlc"),
            Path::new("."),
            &mut PhaseOverrides::default(),
        );
        assert_eq!(attempt.strategy_applied, "none");
        assert_eq!(attempt.outcome, RecoveryOutcome::Unresolved);
    }

    #[test]
    fn test_ledger_tracks_categories() {
        let mut ledger = RecoveryLedger::new();
        assert!(!ledger.already_tried(ErrorCategory::Timeout));
        ledger.record(RecoveryAttempt {
            phase: "stress".into(),
            error_category: ErrorCategory::Timeout,
            strategy_applied: "halve_timeout".into(),
            outcome: RecoveryOutcome::Resolved,
            detail: String::new(),
        });
        assert!(ledger.already_tried(ErrorCategory::Timeout));
        assert!(!ledger.already_tried(ErrorCategory::Unknown));
        assert_eq!(ledger.into_attempts().len(), 1);
    }
}
