//! Phase definitions and the phase registry.
//!
//! This module provides:
//! - `PhaseSpec`, the immutable definition of one scored validation phase
//! - `PhaseRegistry`, the validated, ordered catalog built from configuration
//! - The built-in catalog used when `gauntlet.toml` declares no phases

use crate::errors::ConfigError;
use crate::gauntlet_config::{
    ExecutorDef, ExecutorKind, GauntletToml, PhaseCategory, PhaseDef,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// A single validation phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSpec {
    pub name: String,
    /// Key into the executor catalog
    pub executor: String,
    pub timeout: Duration,
    pub weight: u32,
    pub enabled: bool,
    /// Name of an earlier phase that must succeed first
    pub depends_on: Option<String>,
    pub category: PhaseCategory,
    /// Minimum pass ratio for proportional classifiers
    pub pass_threshold: f64,
    /// Work cache cleared by the stale-cache recovery strategy
    pub cache_dir: Option<PathBuf>,
    pub description: String,
    /// Set when the phase was switched off, so the skip reason can say why
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

impl PhaseSpec {
    /// Create a phase with defaults for everything but name, executor and weight.
    pub fn new(name: &str, executor: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            executor: executor.to_string(),
            timeout: Duration::from_secs(1800),
            weight,
            enabled: true,
            depends_on: None,
            category: PhaseCategory::Other,
            pass_threshold: 1.0,
            cache_dir: None,
            description: String::new(),
            disabled_reason: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dependency(mut self, dependency: &str) -> Self {
        self.depends_on = Some(dependency.to_string());
        self
    }

    pub fn with_category(mut self, category: PhaseCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn disabled(mut self, reason: &str) -> Self {
        self.enabled = false;
        self.disabled_reason = Some(reason.to_string());
        self
    }

    fn from_def(def: &PhaseDef, global_timeout: Duration) -> Self {
        let timeout = if def.timeout_secs == 0 {
            global_timeout
        } else {
            Duration::from_secs(def.timeout_secs)
        };
        Self {
            name: def.name.clone(),
            executor: def.executor.clone(),
            timeout,
            weight: def.weight,
            enabled: def.enabled,
            depends_on: def.depends_on.clone(),
            category: def.category,
            pass_threshold: def.pass_threshold,
            cache_dir: def.cache_dir.clone(),
            description: def.description.clone(),
            disabled_reason: (!def.enabled).then(|| "disabled in configuration".to_string()),
        }
    }
}

/// Validated, ordered phase catalog.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: Vec<PhaseSpec>,
    executors: BTreeMap<String, ExecutorDef>,
    max_score: u32,
}

impl PhaseRegistry {
    /// Build the registry from configuration, falling back to the built-in catalog
    /// when no phases are declared. User executors override built-in ones.
    pub fn from_config(config: &GauntletToml) -> Result<Self, ConfigError> {
        if config.run.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "run.timeout_secs".to_string(),
                message: "timeout must be at least 1 second".to_string(),
            });
        }
        let global_timeout = Duration::from_secs(config.run.timeout_secs);

        let mut executors = default_executors();
        executors.extend(config.executors.clone());

        let phases = if config.phases.is_empty() {
            default_phase_defs()
        } else {
            config.phases.clone()
        };

        let phases = phases
            .iter()
            .map(|def| PhaseSpec::from_def(def, global_timeout))
            .collect();

        Self::new(phases, executors, config.scoring.max_score)
    }

    /// Build and validate a registry from already-constructed specs.
    pub fn new(
        phases: Vec<PhaseSpec>,
        executors: BTreeMap<String, ExecutorDef>,
        max_score: u32,
    ) -> Result<Self, ConfigError> {
        let registry = Self {
            phases,
            executors,
            max_score,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.phases.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "phases.name".to_string(),
                    message: "phase name must not be empty".to_string(),
                });
            }
            if let Some(ref dep) = phase.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::InvalidDependency {
                        phase: phase.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(ConfigError::DuplicatePhase(phase.name.clone()));
            }
            if !self.executors.contains_key(&phase.executor) {
                return Err(ConfigError::UnknownExecutor {
                    phase: phase.name.clone(),
                    executor: phase.executor.clone(),
                });
            }
            if !(0.0..=1.0).contains(&phase.pass_threshold) {
                return Err(ConfigError::InvalidValue {
                    field: format!("phases.{}.pass_threshold", phase.name),
                    message: format!("{} is outside [0, 1]", phase.pass_threshold),
                });
            }
            if phase.timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("phases.{}.timeout_secs", phase.name),
                    message: "resolved timeout is zero".to_string(),
                });
            }
            if phase.weight > self.max_score {
                return Err(ConfigError::InvalidValue {
                    field: format!("phases.{}.weight", phase.name),
                    message: format!("{} exceeds max_score {}", phase.weight, self.max_score),
                });
            }
        }

        let total = self.total_weight();
        if total != u64::from(self.max_score) {
            return Err(ConfigError::WeightMismatch {
                expected: self.max_score,
                actual: total,
            });
        }

        Ok(())
    }

    /// Phases in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &PhaseSpec> {
        self.phases.iter()
    }

    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    pub fn get(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn executors(&self) -> &BTreeMap<String, ExecutorDef> {
        &self.executors
    }

    pub fn executor_def(&self, name: &str) -> Option<&ExecutorDef> {
        self.executors.get(name)
    }

    /// Widened so large catalogs cannot overflow.
    pub fn total_weight(&self) -> u64 {
        self.phases.iter().map(|p| u64::from(p.weight)).sum()
    }

    pub fn max_score(&self) -> u32 {
        self.max_score
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Disable phases by category or by name. Unknown names are returned so the
    /// caller can report them.
    pub fn apply_skips(&mut self, categories: &[PhaseCategory], names: &[String]) -> Vec<String> {
        for phase in &mut self.phases {
            if !phase.enabled {
                continue;
            }
            if categories.contains(&phase.category) {
                phase.enabled = false;
                phase.disabled_reason = Some(format!("disabled by --skip-{}", phase.category));
            } else if names.contains(&phase.name) {
                phase.enabled = false;
                phase.disabled_reason = Some("disabled by --skip-phase".to_string());
            }
        }
        names
            .iter()
            .filter(|n| self.get(n).is_none())
            .cloned()
            .collect()
    }

    /// Override per-phase timeouts. Unknown names are returned.
    pub fn apply_timeouts(&mut self, overrides: &[(String, u64)]) -> Vec<String> {
        let mut unknown = Vec::new();
        for (name, secs) in overrides {
            match self.phases.iter_mut().find(|p| &p.name == name) {
                Some(phase) => phase.timeout = Duration::from_secs(*secs),
                None => unknown.push(name.clone()),
            }
        }
        unknown
    }
}

/// Built-in executors for a Rust consensus implementation with TLA+ models.
pub fn default_executors() -> BTreeMap<String, ExecutorDef> {
    let mut map = BTreeMap::new();
    map.insert(
        "build".to_string(),
        ExecutorDef::new(ExecutorKind::Command, "build_tool", &["build", "--workspace", "--all-targets"]),
    );
    map.insert(
        "model_checker".to_string(),
        ExecutorDef::new(
            ExecutorKind::ModelChecker,
            "model_checker",
            &["-workers", "auto", "-config", "formal/Consensus.cfg", "formal/Consensus.tla"],
        ),
    );
    map.insert(
        "theorem_prover".to_string(),
        ExecutorDef::new(
            ExecutorKind::TheoremProver,
            "theorem_prover",
            &["--threads", "4", "formal/proofs/ConsensusProofs.tla"],
        ),
    );
    map.insert(
        "unit_tests".to_string(),
        ExecutorDef::new(ExecutorKind::TestSuite, "build_tool", &["test", "--workspace", "--lib"]),
    );
    map.insert(
        "integration_tests".to_string(),
        ExecutorDef::new(ExecutorKind::TestSuite, "build_tool", &["test", "--workspace", "--tests"]),
    );
    map.insert(
        "stress_tests".to_string(),
        ExecutorDef::new(
            ExecutorKind::TestSuite,
            "build_tool",
            &["test", "--release", "--test", "stress", "--", "--include-ignored"],
        ),
    );
    map.insert(
        "byzantine_tests".to_string(),
        ExecutorDef::new(
            ExecutorKind::TestSuite,
            "build_tool",
            &["test", "--release", "--test", "byzantine", "--", "--include-ignored"],
        ),
    );
    map.insert(
        "benchmarks".to_string(),
        ExecutorDef::new(ExecutorKind::Command, "build_tool", &["bench", "--bench", "consensus"])
            .with_success_marker("time:"),
    );
    map
}

#[allow(clippy::too_many_arguments)]
fn phase_def(
    name: &str,
    executor: &str,
    category: PhaseCategory,
    weight: u32,
    timeout_secs: u64,
    depends_on: Option<&str>,
    pass_threshold: f64,
    cache_dir: Option<&str>,
    description: &str,
) -> PhaseDef {
    PhaseDef {
        name: name.to_string(),
        executor: executor.to_string(),
        category,
        weight,
        timeout_secs,
        enabled: true,
        depends_on: depends_on.map(str::to_string),
        pass_threshold,
        cache_dir: cache_dir.map(PathBuf::from),
        description: description.to_string(),
    }
}

/// The built-in eight-phase catalog; weights sum to the default max score of 1000.
pub fn default_phase_defs() -> Vec<PhaseDef> {
    use PhaseCategory::*;
    vec![
        phase_def("build", "build", Tests, 100, 900, None, 1.0, Some("target"), "Compile the implementation"),
        phase_def("model_check", "model_checker", Formal, 150, 3600, None, 1.0, Some("states"), "Exhaustive model checking of the protocol model"),
        phase_def("proofs", "theorem_prover", Proofs, 150, 3600, None, 0.9, None, "Machine-checked safety proofs"),
        phase_def("unit_tests", "unit_tests", Tests, 150, 0, Some("build"), 1.0, Some("target"), "Unit test suite"),
        phase_def("integration_tests", "integration_tests", Tests, 150, 0, Some("build"), 0.9, Some("target"), "Integration test suite"),
        phase_def("stress", "stress_tests", Stress, 100, 2400, Some("unit_tests"), 0.8, Some("target"), "Partition and load stress scenarios"),
        phase_def("byzantine", "byzantine_tests", Stress, 100, 2400, Some("unit_tests"), 0.85, Some("target"), "Byzantine fault scenarios"),
        phase_def("performance", "benchmarks", Performance, 100, 2400, Some("build"), 1.0, None, "Throughput and latency benchmarks"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_of(phases: Vec<PhaseSpec>, max: u32) -> Result<PhaseRegistry, ConfigError> {
        PhaseRegistry::new(phases, default_executors(), max)
    }

    #[test]
    fn test_default_catalog_is_valid() {
        let registry = PhaseRegistry::from_config(&GauntletToml::default()).unwrap();
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.total_weight(), 1000);
        assert_eq!(registry.phases()[0].name, "build");
        // timeout_secs = 0 inherits the global timeout
        assert_eq!(
            registry.get("unit_tests").unwrap().timeout,
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = registry_of(
            vec![PhaseSpec::new("a", "build", 50), PhaseSpec::new("a", "build", 50)],
            100,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePhase(ref n) if n == "a"));
    }

    #[test]
    fn test_dependency_must_be_earlier() {
        let err = registry_of(
            vec![
                PhaseSpec::new("a", "build", 50).with_dependency("b"),
                PhaseSpec::new("b", "build", 50),
            ],
            100,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependency { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = registry_of(vec![PhaseSpec::new("a", "build", 100).with_dependency("a")], 100)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependency { .. }));
    }

    #[test]
    fn test_weights_must_sum_to_max() {
        let err = registry_of(
            vec![PhaseSpec::new("a", "build", 50), PhaseSpec::new("b", "build", 40)],
            100,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::WeightMismatch {
                expected: 100,
                actual: 90
            }
        ));
    }

    #[test]
    fn test_weight_sum_does_not_overflow() {
        let err = registry_of(
            vec![
                PhaseSpec::new("a", "build", u32::MAX),
                PhaseSpec::new("b", "build", u32::MAX),
            ],
            u32::MAX,
        )
        .unwrap_err();
        match err {
            ConfigError::WeightMismatch { expected, actual } => {
                assert_eq!(expected, u32::MAX);
                assert_eq!(actual, 2 * u64::from(u32::MAX));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_global_timeout_rejected() {
        let mut config = GauntletToml::default();
        config.run.timeout_secs = 0;
        let err = PhaseRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("run.timeout_secs"));
    }

    #[test]
    fn test_unknown_executor_rejected() {
        let err = registry_of(vec![PhaseSpec::new("a", "nope", 100)], 100).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownExecutor { .. }));
    }

    #[test]
    fn test_pass_threshold_range() {
        let err = registry_of(
            vec![PhaseSpec::new("a", "build", 100).with_pass_threshold(1.5)],
            100,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(matches!(
            registry_of(vec![], 100).unwrap_err(),
            ConfigError::EmptyCatalog
        ));
    }

    #[test]
    fn test_apply_skips_by_category_and_name() {
        let mut registry = PhaseRegistry::from_config(&GauntletToml::default()).unwrap();
        let unknown = registry.apply_skips(
            &[PhaseCategory::Stress],
            &["performance".to_string(), "ghost".to_string()],
        );
        assert_eq!(unknown, vec!["ghost".to_string()]);
        assert!(!registry.get("stress").unwrap().enabled);
        assert!(!registry.get("byzantine").unwrap().enabled);
        assert_eq!(
            registry.get("stress").unwrap().disabled_reason.as_deref(),
            Some("disabled by --skip-stress")
        );
        assert!(!registry.get("performance").unwrap().enabled);
        assert!(registry.get("build").unwrap().enabled);
    }

    #[test]
    fn test_apply_timeouts() {
        let mut registry = PhaseRegistry::from_config(&GauntletToml::default()).unwrap();
        let unknown = registry.apply_timeouts(&[("stress".into(), 60), ("ghost".into(), 1)]);
        assert_eq!(unknown, vec!["ghost".to_string()]);
        assert_eq!(registry.get("stress").unwrap().timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_user_phases_replace_default_catalog() {
        let content = r#"
[scoring]
max_score = 100

[executors.smoke]
kind = "command"
tool = "sh"
args = ["-c", "true"]

[[phases]]
name = "smoke"
executor = "smoke"
weight = 100
enabled = false
"#;
        let cfg = GauntletToml::parse(content).unwrap();
        let registry = PhaseRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.len(), 1);
        let smoke = registry.get("smoke").unwrap();
        assert!(!smoke.enabled);
        assert_eq!(
            smoke.disabled_reason.as_deref(),
            Some("disabled in configuration")
        );
        // built-in executors remain addressable
        assert!(registry.executor_def("model_checker").is_some());
    }
}
