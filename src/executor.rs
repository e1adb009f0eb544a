//! Phase executors.
//!
//! A `PhaseExecutor` performs one attempt of a phase and reports its quality.
//! The production implementation, `ToolExecutor`, goes through the tool
//! adapter and a classifier; tests plug in their own implementations.

use crate::errors::{ConfigError, ToolError};
use crate::gauntlet_config::ExecutorDef;
use crate::phase::PhaseSpec;
use crate::recovery::PhaseOverrides;
use crate::tool::{self, Classifier, ToolInvocation, ToolPaths};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything an executor needs for one attempt.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub spec: PhaseSpec,
    /// 1-based attempt number
    pub attempt: u32,
    pub timeout: Duration,
    pub overrides: PhaseOverrides,
    pub project_dir: PathBuf,
    /// `artifacts/<phase>/`
    pub artifact_dir: PathBuf,
    pub cancel: CancellationToken,
}

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutput {
    /// Fraction of the phase weight earned, in `[0, 1]`
    pub quality: f64,
    pub warnings: Vec<String>,
    pub artifact_paths: Vec<PathBuf>,
    pub summary: String,
}

impl PhaseOutput {
    pub fn with_quality(quality: f64) -> Self {
        Self {
            quality,
            warnings: Vec::new(),
            artifact_paths: Vec::new(),
            summary: String::new(),
        }
    }
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Run one attempt. Failures are categorized `ToolError`s; the caller
    /// decides whether to recover and retry.
    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutput, ToolError>;
}

/// Runs an external tool and classifies its outcome.
pub struct ToolExecutor {
    name: String,
    def: ExecutorDef,
    program: String,
    classifier: Classifier,
}

impl ToolExecutor {
    pub fn new(name: &str, def: ExecutorDef, paths: &ToolPaths) -> Result<Self, ConfigError> {
        let classifier = Classifier::from_def(name, &def)?;
        let program = paths.resolve(&def.tool);
        Ok(Self {
            name: name.to_string(),
            def,
            program,
            classifier,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn invocation(&self, ctx: &PhaseContext) -> ToolInvocation {
        let program = ctx.overrides.program_for(&self.program);

        let working_dir = match self.def.working_dir {
            Some(ref dir) if dir.is_absolute() => dir.clone(),
            Some(ref dir) => ctx.project_dir.join(dir),
            None => ctx.project_dir.clone(),
        };

        let mut invocation =
            ToolInvocation::new(program, self.def.args.clone(), &working_dir, ctx.timeout);
        invocation.env = self.def.env.clone();
        invocation.env.extend(ctx.overrides.env());
        invocation
    }
}

#[async_trait]
impl PhaseExecutor for ToolExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutput, ToolError> {
        let invocation = self.invocation(ctx);
        let tool_name = invocation.program.display().to_string();

        let outcome = tool::invoke(&invocation, &ctx.cancel).await?;
        debug!(
            phase = %ctx.spec.name,
            exit_code = ?outcome.exit_code,
            duration_ms = outcome.duration.as_millis() as u64,
            "Tool finished"
        );

        let artifact_paths = match outcome.write_artifacts(&ctx.artifact_dir, ctx.attempt) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(phase = %ctx.spec.name, error = %e, "Could not write tool output");
                Vec::new()
            }
        };

        if outcome.timed_out {
            return Err(ToolError::ToolTimeout {
                tool: tool_name,
                timeout: ctx.timeout,
            });
        }

        let assessment = self
            .classifier
            .classify(&tool_name, &outcome, ctx.spec.pass_threshold)?;

        Ok(PhaseOutput {
            quality: assessment.quality,
            warnings: assessment.warnings,
            artifact_paths,
            summary: assessment.summary,
        })
    }
}

/// Executors keyed by reference.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn PhaseExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build tool executors for every definition.
    pub fn from_defs(
        defs: &BTreeMap<String, ExecutorDef>,
        paths: &ToolPaths,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (name, def) in defs {
            let executor = ToolExecutor::new(name, def.clone(), paths)?;
            registry.insert(name, Arc::new(executor));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: &str, executor: Arc<dyn PhaseExecutor>) {
        self.executors.insert(name.to_string(), executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PhaseExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use crate::gauntlet_config::ExecutorKind;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path, spec: PhaseSpec, timeout: Duration) -> PhaseContext {
        PhaseContext {
            artifact_dir: dir.join("artifacts").join(&spec.name),
            spec,
            attempt: 1,
            timeout,
            overrides: PhaseOverrides::default(),
            project_dir: dir.to_path_buf(),
            cancel: CancellationToken::new(),
        }
    }

    fn sh_def(kind: ExecutorKind, script: &str) -> ExecutorDef {
        ExecutorDef::new(kind, "sh", &["-c", script])
    }

    #[tokio::test]
    async fn test_tool_executor_success_writes_artifacts() {
        let dir = tempdir().unwrap();
        let exec = ToolExecutor::new(
            "unit",
            sh_def(
                ExecutorKind::TestSuite,
                "echo 'test result: ok. 4 passed; 0 failed; 0 ignored'",
            ),
            &ToolPaths::default(),
        )
        .unwrap();

        let ctx = context(dir.path(), PhaseSpec::new("unit", "unit", 100), Duration::from_secs(10));
        let output = exec.run(&ctx).await.unwrap();
        assert_eq!(output.quality, 1.0);
        assert_eq!(output.summary, "4/4 tests passed");
        assert_eq!(output.artifact_paths.len(), 2);
        assert!(output.artifact_paths[0].starts_with(dir.path().join("artifacts/unit")));
    }

    #[tokio::test]
    async fn test_tool_executor_timeout_is_tool_timeout() {
        let dir = tempdir().unwrap();
        let exec = ToolExecutor::new(
            "slow",
            sh_def(ExecutorKind::Command, "sleep 20"),
            &ToolPaths::default(),
        )
        .unwrap();

        let ctx = context(dir.path(), PhaseSpec::new("slow", "slow", 100), Duration::from_millis(200));
        let err = exec.run(&ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::ToolTimeout { .. }));
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn test_tool_executor_uses_program_override_and_heap_env() {
        let dir = tempdir().unwrap();
        let mut def = ExecutorDef::new(ExecutorKind::Command, "gauntlet-missing-tool", &[
            "-c",
            "echo heap=$GAUNTLET_HEAP_MB",
        ]);
        def.success_marker = Some("heap=6144".to_string());
        let exec = ToolExecutor::new("mc", def, &ToolPaths::default()).unwrap();

        let mut ctx = context(dir.path(), PhaseSpec::new("mc", "mc", 100), Duration::from_secs(10));
        let err = exec.run(&ctx).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ToolMissing);

        ctx.overrides
            .relocated
            .insert("gauntlet-missing-tool".to_string(), PathBuf::from("/bin/sh"));
        ctx.overrides.heap_mb = Some(6144);
        assert!(exec.run(&ctx).await.is_ok());
    }

    #[test]
    fn test_registry_resolves_tool_keys() {
        let mut defs = BTreeMap::new();
        defs.insert(
            "model_checker".to_string(),
            ExecutorDef::new(ExecutorKind::ModelChecker, "model_checker", &[]),
        );
        let paths = ToolPaths::from_lookup(|k| (k == "GAUNTLET_MODEL_CHECKER").then(|| "tlc2".to_string()));
        let exec = ToolExecutor::new("model_checker", defs["model_checker"].clone(), &paths).unwrap();
        assert_eq!(exec.program(), "tlc2");

        let registry = ExecutorRegistry::from_defs(&defs, &paths).unwrap();
        assert!(registry.contains("model_checker"));
        assert_eq!(registry.get("model_checker").unwrap().name(), "model_checker");
        assert!(registry.get("nope").is_none());
    }
}
