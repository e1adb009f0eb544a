//! Outcome classifiers.
//!
//! A classifier turns a raw `ToolOutcome` into either an `Assessment`
//! (success with a quality in `[0, 1]`) or a categorized `ToolError`.
//! Each one is keyed to the textual conventions of a family of tools and is
//! tested against recorded output.

use super::adapter::ToolOutcome;
use crate::errors::{ConfigError, ErrorCategory, ToolError};
use crate::gauntlet_config::{ExecutorDef, ExecutorKind};
use regex::Regex;
use std::sync::LazyLock;

static TLC_INVARIANT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Invariant (\S+) is violated").expect("valid regex"));
static TLC_STATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) states generated, (\d+) distinct states found").expect("valid regex")
});
static TLAPM_ALL_PROVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"All (\d+) obligations? proved").expect("valid regex"));
static TLAPM_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+) obligations? failed").expect("valid regex"));
static SHELL_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^|: )([^\s:]+): (?:command )?not found\s*$").expect("valid regex")
});
static ZSH_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"command not found: (\S+)").expect("valid regex"));
static TEST_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed").expect("valid regex")
});

/// Successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub quality: f64,
    pub warnings: Vec<String>,
    pub summary: String,
}

impl Assessment {
    pub fn full(summary: impl Into<String>) -> Self {
        Self {
            quality: 1.0,
            warnings: Vec::new(),
            summary: summary.into(),
        }
    }
}

/// Built-in classifier families.
#[derive(Debug, Clone)]
pub enum Classifier {
    ModelChecker,
    TheoremProver,
    TestSuite,
    Command { marker: Option<String> },
    Pattern { success: Option<Regex>, failures: Vec<Regex> },
}

impl Classifier {
    pub fn from_def(name: &str, def: &ExecutorDef) -> Result<Self, ConfigError> {
        Ok(match def.kind {
            ExecutorKind::ModelChecker => Classifier::ModelChecker,
            ExecutorKind::TheoremProver => Classifier::TheoremProver,
            ExecutorKind::TestSuite => Classifier::TestSuite,
            ExecutorKind::Command => Classifier::Command {
                marker: def.success_marker.clone(),
            },
            ExecutorKind::Pattern => {
                let compile = |pattern: &str| {
                    Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                        field: format!("executors.{}", name),
                        message: format!("invalid pattern '{}': {}", pattern, e),
                    })
                };
                Classifier::Pattern {
                    success: def.success_marker.as_deref().map(compile).transpose()?,
                    failures: def
                        .failure_markers
                        .iter()
                        .map(|p| compile(p))
                        .collect::<Result<_, _>>()?,
                }
            }
        })
    }

    /// Classify an outcome that did not time out.
    pub fn classify(
        &self,
        tool: &str,
        outcome: &ToolOutcome,
        pass_threshold: f64,
    ) -> Result<Assessment, ToolError> {
        match self {
            Classifier::ModelChecker => classify_model_checker(tool, outcome),
            Classifier::TheoremProver => classify_theorem_prover(tool, outcome, pass_threshold),
            Classifier::TestSuite => classify_test_suite(tool, outcome, pass_threshold),
            Classifier::Command { marker } => classify_command(tool, outcome, marker.as_deref()),
            Classifier::Pattern { success, failures } => {
                classify_pattern(tool, outcome, success.as_ref(), failures)
            }
        }
    }
}

/// Map failure text and exit code to a recovery category.
pub fn categorize_failure(text: &str, exit_code: Option<i32>) -> ErrorCategory {
    let lower = text.to_lowercase();

    if lower.contains("outofmemoryerror")
        || lower.contains("heap space")
        || lower.contains("out of memory")
        || lower.contains("cannot allocate memory")
        || lower.contains("memory allocation failed")
    {
        return ErrorCategory::OutOfMemory;
    }
    if lower.contains("stale")
        || lower.contains("corrupt")
        || lower.contains("found possibly newer version of crate")
        || lower.contains("compiled by an incompatible version of rustc")
    {
        return ErrorCategory::StaleCache;
    }
    if lower.contains("command not found") || exit_code == Some(127) {
        return ErrorCategory::ToolMissing;
    }
    if exit_code == Some(137) {
        return ErrorCategory::OutOfMemory;
    }

    ErrorCategory::Unknown
}

/// Name of the command a shell reported as missing, e.g. `tlc` from
/// `sh: 1: tlc: not found`.
pub fn missing_command(text: &str) -> Option<String> {
    SHELL_NOT_FOUND
        .captures(text)
        .or_else(|| ZSH_NOT_FOUND.captures(text))
        .map(|caps| caps[1].to_string())
}

fn execution_error(tool: &str, outcome: &ToolOutcome, reason: String) -> ToolError {
    let text = outcome.combined();
    let category = categorize_failure(&text, outcome.exit_code);

    if category == ErrorCategory::ToolMissing {
        if let Some(missing) = missing_command(&text) {
            return ToolError::ToolMissing {
                tool: missing,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, reason),
            };
        }
    }

    ToolError::ToolExecution {
        tool: tool.to_string(),
        exit_code: outcome.exit_code.unwrap_or(-1),
        category,
        reason,
    }
}

/// Last non-empty line of stderr, else of stdout.
fn last_line(outcome: &ToolOutcome) -> String {
    [&outcome.stderr, &outcome.stdout]
        .iter()
        .find_map(|text| text.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("no output")
        .to_string()
}

fn classify_model_checker(tool: &str, outcome: &ToolOutcome) -> Result<Assessment, ToolError> {
    let text = outcome.combined();

    if let Some(caps) = TLC_INVARIANT.captures(&text) {
        return Err(execution_error(
            tool,
            outcome,
            format!("invariant {} violated", &caps[1]),
        ));
    }
    if text.contains("Deadlock reached") {
        return Err(execution_error(tool, outcome, "deadlock reached".to_string()));
    }
    if text.contains("Temporal properties were violated") {
        return Err(execution_error(
            tool,
            outcome,
            "temporal properties violated".to_string(),
        ));
    }
    if outcome.exit_code != Some(0) {
        return Err(execution_error(tool, outcome, last_line(outcome)));
    }
    if !text.contains("No error has been found") {
        return Err(ToolError::OutputParse {
            tool: tool.to_string(),
            expected: "No error has been found".to_string(),
        });
    }

    let summary = TLC_STATES
        .captures(&text)
        .map(|c| format!("{} states generated, {} distinct", &c[1], &c[2]))
        .unwrap_or_else(|| "model checking completed".to_string());
    let warnings = text
        .lines()
        .filter(|l| l.trim_start().starts_with("Warning"))
        .map(|l| l.trim().to_string())
        .collect();

    Ok(Assessment {
        quality: 1.0,
        warnings,
        summary,
    })
}

fn classify_theorem_prover(
    tool: &str,
    outcome: &ToolOutcome,
    pass_threshold: f64,
) -> Result<Assessment, ToolError> {
    let text = outcome.combined();

    if let Some(caps) = TLAPM_ALL_PROVED.captures(&text) {
        return Ok(Assessment::full(format!("all {} obligations proved", &caps[1])));
    }

    if let Some(caps) = TLAPM_FAILED.captures(&text) {
        let failed: u64 = caps[1].parse().unwrap_or(0);
        let total: u64 = caps[2].parse().unwrap_or(0);
        if total > 0 && failed <= total {
            let proved = total - failed;
            let ratio = proved as f64 / total as f64;
            let summary = format!("{}/{} obligations proved", proved, total);
            if ratio >= pass_threshold {
                return Ok(Assessment {
                    quality: ratio,
                    warnings: vec![format!("{} obligations failed", failed)],
                    summary,
                });
            }
            return Err(execution_error(
                tool,
                outcome,
                format!("{}, below threshold {:.0}%", summary, pass_threshold * 100.0),
            ));
        }
    }

    if outcome.exit_code != Some(0) {
        return Err(execution_error(tool, outcome, last_line(outcome)));
    }

    Err(ToolError::OutputParse {
        tool: tool.to_string(),
        expected: "obligations proved".to_string(),
    })
}

fn classify_test_suite(
    tool: &str,
    outcome: &ToolOutcome,
    pass_threshold: f64,
) -> Result<Assessment, ToolError> {
    let text = outcome.combined();

    let (summaries, passed, failed) = TEST_RESULT
        .captures_iter(&text)
        .fold((0usize, 0u64, 0u64), |(n, p, f), caps| {
            (
                n + 1,
                p + caps[1].parse::<u64>().unwrap_or(0),
                f + caps[2].parse::<u64>().unwrap_or(0),
            )
        });
    let total = passed + failed;

    if summaries == 0 {
        if outcome.exit_code == Some(0) {
            return Err(ToolError::OutputParse {
                tool: tool.to_string(),
                expected: "test result summary".to_string(),
            });
        }
        return Err(execution_error(tool, outcome, last_line(outcome)));
    }

    if total == 0 {
        if outcome.exit_code == Some(0) {
            return Ok(Assessment {
                quality: 1.0,
                warnings: vec!["no tests ran".to_string()],
                summary: "0 tests".to_string(),
            });
        }
        return Err(execution_error(tool, outcome, last_line(outcome)));
    }

    let ratio = passed as f64 / total as f64;
    let summary = format!("{}/{} tests passed", passed, total);
    if ratio < pass_threshold {
        return Err(execution_error(
            tool,
            outcome,
            format!("{}, below threshold {:.0}%", summary, pass_threshold * 100.0),
        ));
    }

    let warnings = if failed > 0 {
        vec![format!("{} tests failed", failed)]
    } else {
        Vec::new()
    };
    Ok(Assessment {
        quality: ratio,
        warnings,
        summary,
    })
}

fn classify_command(
    tool: &str,
    outcome: &ToolOutcome,
    marker: Option<&str>,
) -> Result<Assessment, ToolError> {
    if outcome.exit_code != Some(0) {
        return Err(execution_error(tool, outcome, last_line(outcome)));
    }
    if let Some(marker) = marker {
        if !outcome.stdout.contains(marker) {
            return Err(ToolError::OutputParse {
                tool: tool.to_string(),
                expected: marker.to_string(),
            });
        }
    }
    Ok(Assessment::full("exit 0"))
}

fn classify_pattern(
    tool: &str,
    outcome: &ToolOutcome,
    success: Option<&Regex>,
    failures: &[Regex],
) -> Result<Assessment, ToolError> {
    let text = outcome.combined();

    for pattern in failures {
        if let Some(m) = pattern.find(&text) {
            return Err(execution_error(tool, outcome, m.as_str().trim().to_string()));
        }
    }
    match success {
        Some(pattern) => match pattern.find(&text) {
            Some(m) => Ok(Assessment::full(m.as_str().trim().to_string())),
            None => Err(ToolError::OutputParse {
                tool: tool.to_string(),
                expected: pattern.as_str().to_string(),
            }),
        },
        None if outcome.exit_code == Some(0) => Ok(Assessment::full("exit 0")),
        None => Err(execution_error(tool, outcome, last_line(outcome))),
    }
}
