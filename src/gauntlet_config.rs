//! Unified configuration system for Gauntlet.
//!
//! Settings are read from `gauntlet.toml` in the project directory and layered:
//! file → environment → CLI. This is the only module that parses configuration;
//! the phase registry validates what it produces.
//!
//! # Configuration File Format
//!
//! ```toml
//! [run]
//! continue_on_error = false
//! max_retries = 3
//! backoff_base_ms = 2000
//! timeout_secs = 1800
//! jobs = 1
//!
//! [scoring]
//! max_score = 1000
//! low_score_ratio = 0.8
//!
//! [[scoring.tiers]]
//! tier = "ready"
//! min_score = 850
//! max_failures = 0
//!
//! [recovery]
//! timeout_policy = "halve"
//! timeout_floor_secs = 30
//! heap_increment_mb = 2048
//!
//! [executors.model_checker]
//! kind = "model_checker"
//! tool = "model_checker"
//! args = ["-config", "formal/Consensus.cfg", "formal/Consensus.tla"]
//!
//! [[phases]]
//! name = "model_check"
//! executor = "model_checker"
//! category = "formal"
//! weight = 150
//! timeout_secs = 3600
//! cache_dir = "states"
//! ```

use crate::errors::ConfigError;
use crate::scoring::{ReadinessTier, TierRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "gauntlet.toml";

/// Coarse grouping of phases, used by the `--skip-*` switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseCategory {
    Formal,
    Proofs,
    Tests,
    Stress,
    Performance,
    #[default]
    Other,
}

impl std::fmt::Display for PhaseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseCategory::Formal => write!(f, "formal"),
            PhaseCategory::Proofs => write!(f, "proofs"),
            PhaseCategory::Tests => write!(f, "tests"),
            PhaseCategory::Stress => write!(f, "stress"),
            PhaseCategory::Performance => write!(f, "performance"),
            PhaseCategory::Other => write!(f, "other"),
        }
    }
}

/// How the Timeout recovery strategy adjusts the per-attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Halve the per-attempt timeout, never going below the floor.
    #[default]
    Halve,
    /// Multiply the per-attempt timeout by a factor, never exceeding the ceiling.
    Extend,
}

impl std::str::FromStr for TimeoutPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "halve" => Ok(TimeoutPolicy::Halve),
            "extend" => Ok(TimeoutPolicy::Extend),
            _ => anyhow::bail!(
                "Invalid timeout policy '{}'. Valid values: halve, extend",
                s
            ),
        }
    }
}

/// Report output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Markdown,
    Html,
    #[default]
    All,
}

impl OutputFormat {
    pub fn wants_markdown(self) -> bool {
        matches!(self, OutputFormat::Markdown | OutputFormat::All)
    }

    pub fn wants_html(self) -> bool {
        matches!(self, OutputFormat::Html | OutputFormat::All)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "html" => Ok(OutputFormat::Html),
            "all" => Ok(OutputFormat::All),
            _ => anyhow::bail!(
                "Invalid output format '{}'. Valid values: json, markdown, html, all",
                s
            ),
        }
    }
}

/// Run-wide execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub continue_on_error: bool,
    /// Total attempt budget per phase
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Global per-phase timeout; phases with `timeout_secs = 0` inherit it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_jobs() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".gauntlet")
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
            jobs: default_jobs(),
            output_dir: default_output_dir(),
            format: OutputFormat::default(),
        }
    }
}

/// Scoring thresholds and readiness rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSection {
    /// Phase weights must sum to this value
    #[serde(default = "default_max_score")]
    pub max_score: u32,
    /// Successful phases scoring below this share of their weight get a recommendation
    #[serde(default = "default_low_score_ratio")]
    pub low_score_ratio: f64,
    /// Ordered readiness rules, first match wins
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierRule>,
}

fn default_max_score() -> u32 {
    1000
}

fn default_low_score_ratio() -> f64 {
    0.8
}

fn default_tiers() -> Vec<TierRule> {
    vec![
        TierRule::new(ReadinessTier::Ready, 850.0, 0),
        TierRule::new(ReadinessTier::Conditional, 700.0, 1),
    ]
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            max_score: default_max_score(),
            low_score_ratio: default_low_score_ratio(),
            tiers: default_tiers(),
        }
    }
}

/// Recovery strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    #[serde(default = "default_timeout_floor_secs")]
    pub timeout_floor_secs: u64,
    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: f64,
    #[serde(default = "default_timeout_ceiling_secs")]
    pub timeout_ceiling_secs: u64,
    /// Heap ceiling handed to JVM-based tools before any recovery
    #[serde(default = "default_base_heap_mb")]
    pub base_heap_mb: u64,
    #[serde(default = "default_heap_increment_mb")]
    pub heap_increment_mb: u64,
    /// Extra directories searched when a tool binary is missing
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

fn default_recovery_enabled() -> bool {
    true
}

fn default_timeout_floor_secs() -> u64 {
    30
}

fn default_timeout_factor() -> f64 {
    2.0
}

fn default_timeout_ceiling_secs() -> u64 {
    7200
}

fn default_base_heap_mb() -> u64 {
    4096
}

fn default_heap_increment_mb() -> u64 {
    2048
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
            timeout_policy: TimeoutPolicy::default(),
            timeout_floor_secs: default_timeout_floor_secs(),
            timeout_factor: default_timeout_factor(),
            timeout_ceiling_secs: default_timeout_ceiling_secs(),
            base_heap_mb: default_base_heap_mb(),
            heap_increment_mb: default_heap_increment_mb(),
            search_paths: Vec::new(),
        }
    }
}

/// Which built-in classifier an executor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    ModelChecker,
    TheoremProver,
    TestSuite,
    /// Exit code decides; an optional marker must also be present on success
    Command,
    /// Regex success/failure patterns decide
    Pattern,
}

/// Definition of an executor: what to run and how to classify it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorDef {
    pub kind: ExecutorKind,
    /// Tool key (`model_checker`, `theorem_prover`, `build_tool`, `runtime`) or a program name
    pub tool: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Required on stdout for `command`; success regex for `pattern`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_marker: Option<String>,
    /// Failure regexes for `pattern`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_markers: Vec<String>,
}

impl ExecutorDef {
    pub fn new(kind: ExecutorKind, tool: &str, args: &[&str]) -> Self {
        Self {
            kind,
            tool: tool.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            success_marker: None,
            failure_markers: Vec::new(),
        }
    }

    pub fn with_success_marker(mut self, marker: &str) -> Self {
        self.success_marker = Some(marker.to_string());
        self
    }
}

/// One `[[phases]]` entry as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDef {
    pub name: String,
    pub executor: String,
    #[serde(default)]
    pub category: PhaseCategory,
    pub weight: u32,
    /// 0 inherits `run.timeout_secs`
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_phase_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub description: String,
}

fn default_phase_enabled() -> bool {
    true
}

fn default_pass_threshold() -> f64 {
    1.0
}

/// The complete gauntlet.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GauntletToml {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub scoring: ScoringSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    /// Executors keyed by reference; merged over the built-in catalog
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorDef>,
    /// Ordered phase catalog; empty means the built-in catalog
    #[serde(default)]
    pub phases: Vec<PhaseDef>,
}

impl GauntletToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::ParseFailed { message, .. } => ConfigError::ParseFailed {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            path: PathBuf::from(CONFIG_FILE_NAME),
            message: e.to_string(),
        })
    }

    /// Load from an explicit path, or from `<project_dir>/gauntlet.toml` when present.
    /// Returns the default configuration if no file exists.
    pub fn load_or_default(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let config_path = project_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize to a pretty TOML string.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        use anyhow::Context;
        toml::to_string_pretty(self).context("Failed to serialize gauntlet.toml")
    }

    /// Apply `GAUNTLET_*` environment overrides using the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GAUNTLET_MAX_RETRIES") {
            self.run.max_retries = parse_env("GAUNTLET_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("GAUNTLET_TIMEOUT_SECS") {
            self.run.timeout_secs = parse_env("GAUNTLET_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("GAUNTLET_JOBS") {
            self.run.jobs = parse_env("GAUNTLET_JOBS", &v)?;
        }
        if let Some(v) = lookup("GAUNTLET_CONTINUE_ON_ERROR") {
            self.run.continue_on_error = v != "false" && v != "0";
        }
        Ok(())
    }

    /// Apply CLI overrides, which win over file and environment.
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if cli.continue_on_error {
            self.run.continue_on_error = true;
        }
        if let Some(n) = cli.max_retries {
            self.run.max_retries = n;
        }
        if let Some(secs) = cli.timeout_secs {
            self.run.timeout_secs = secs;
        }
        if let Some(jobs) = cli.jobs {
            self.run.jobs = jobs;
        }
        if let Some(format) = cli.format {
            self.run.format = format;
        }
        if let Some(ref dir) = cli.output_dir {
            self.run.output_dir = dir.clone();
        }
    }

    /// Validate run-level values and return any warnings.
    ///
    /// Hard errors in the phase catalog are reported by the registry instead.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.run.max_retries == 0 {
            warnings.push("run.max_retries is 0; every phase gets a single attempt".to_string());
        }
        if self.run.jobs == 0 {
            warnings.push("run.jobs is 0; falling back to sequential execution".to_string());
        }
        if !(0.0..=1.0).contains(&self.scoring.low_score_ratio) {
            warnings.push(format!(
                "scoring.low_score_ratio {} is outside [0, 1]",
                self.scoring.low_score_ratio
            ));
        }
        if self.scoring.tiers.is_empty() {
            warnings.push(
                "scoring.tiers is empty; every run will be rated needs_improvement".to_string(),
            );
        }
        for rule in &self.scoring.tiers {
            if rule.min_score > self.scoring.max_score as f64 {
                warnings.push(format!(
                    "Tier '{}' requires {} points but max_score is {}",
                    rule.tier, rule.min_score, self.scoring.max_score
                ));
            }
        }
        if self.recovery.timeout_factor < 1.0 {
            warnings.push(format!(
                "recovery.timeout_factor {} shrinks timeouts under the extend policy",
                self.recovery.timeout_factor
            ));
        }

        warnings
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: key.to_string(),
        message: format!("cannot parse '{}'", value),
    })
}

/// Overrides collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub continue_on_error: bool,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub jobs: Option<usize>,
    pub format: Option<OutputFormat>,
    pub output_dir: Option<PathBuf>,
    /// `NAME=SECS` pairs
    pub phase_timeouts: Vec<(String, u64)>,
    pub skip_categories: Vec<PhaseCategory>,
    pub skip_phases: Vec<String>,
}

/// Parse a `NAME=SECS` phase timeout argument.
pub fn parse_phase_timeout(arg: &str) -> Result<(String, u64), String> {
    let (name, secs) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SECS, got '{}'", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing phase name in '{}'", arg));
    }
    let secs = secs
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid seconds in '{}'", arg))?;
    if secs == 0 {
        return Err(format!("timeout for '{}' must be at least 1 second", name));
    }
    Ok((name.to_string(), secs))
}
