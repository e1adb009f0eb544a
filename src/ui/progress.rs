use crate::recovery::{RecoveryAttempt, RecoveryOutcome};
use crate::scoring::ReadinessTier;
use crate::ui::icons::{CHECK, CLOCK, CROSS, RETRY, RUNNING, SKIP, SPARKLE, STOP, WRENCH};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Terminal UI for a validation run, rendered via `indicatif` progress bars.
///
/// A run bar at the top counts phases reaching a terminal status; below it
/// each running phase gets its own spinner, removed when the phase finishes.
/// Several spinners are visible at once when phases run in parallel.
///
/// All methods take `&self` and are safe to call from phase tasks.
pub struct OrchestratorUI {
    multi: MultiProgress,
    run_bar: ProgressBar,
    spinners: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
}

impl OrchestratorUI {
    /// Create the UI with a run bar sized to `total_phases`.
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let run_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let run_bar = multi.add(ProgressBar::new(total_phases));
        run_bar.set_style(run_style);
        run_bar.set_prefix("Phases");

        Self {
            multi,
            run_bar,
            spinners: Mutex::new(HashMap::new()),
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn with_spinner(&self, phase: &str, f: impl FnOnce(&ProgressBar)) {
        if let Ok(spinners) = self.spinners.lock() {
            if let Some(bar) = spinners.get(phase) {
                f(bar);
            }
        }
    }

    fn finish_spinner(&self, phase: &str) {
        let bar = self
            .spinners
            .lock()
            .ok()
            .and_then(|mut spinners| spinners.remove(phase));
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        self.run_bar.inc(1);
    }

    /// Add a spinner for a phase that just started.
    pub fn start_phase(&self, phase: &str, description: &str) {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix(format!("{:>18}", phase));
        bar.set_message(format!("{}{}", RUNNING, description));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut spinners) = self.spinners.lock() {
            spinners.insert(phase.to_string(), bar);
        }
        self.run_bar
            .set_message(format!("running {}", style(phase).yellow()));
    }

    /// Update the spinner for a new attempt.
    pub fn attempt_started(&self, phase: &str, attempt: u32, max_attempts: u32, timeout: Duration) {
        self.with_spinner(phase, |bar| {
            bar.set_message(format!(
                "attempt {}/{} {}",
                style(attempt).cyan(),
                max_attempts,
                style(format!("({}{:.1}s budget)", CLOCK, timeout.as_secs_f64())).dim()
            ));
        });
    }

    /// Report a failed attempt that will be retried.
    pub fn attempt_failed(&self, phase: &str, attempt: u32, delay: Duration, reason: &str) {
        self.with_spinner(phase, |bar| {
            bar.set_message(format!(
                "{}retrying in {:.1}s",
                RETRY,
                delay.as_secs_f64()
            ));
        });
        if self.verbose {
            self.print_line(format!(
                "    {} {} attempt {} failed: {}",
                RETRY,
                style(phase).yellow(),
                attempt,
                style(reason).dim()
            ));
        }
    }

    /// Show a recovery strategy application.
    pub fn recovery_applied(&self, attempt: &RecoveryAttempt) {
        let outcome = match attempt.outcome {
            RecoveryOutcome::Resolved => style(attempt.outcome.to_string()).green(),
            RecoveryOutcome::Unresolved => style(attempt.outcome.to_string()).red(),
        };
        self.print_line(format!(
            "    {} {} {} for {}: {} {}",
            WRENCH,
            style(&attempt.phase).yellow(),
            attempt.strategy_applied,
            attempt.error_category,
            outcome,
            style(&attempt.detail).dim()
        ));
    }

    pub fn phase_succeeded(&self, phase: &str, score: f64, weight: u32) {
        self.finish_spinner(phase);
        self.print_line(format!(
            "{} {} {}",
            CHECK,
            style(phase).green().bold(),
            style(format!("{:.1}/{}", score, weight)).dim()
        ));
    }

    pub fn phase_failed(&self, phase: &str, reason: &str) {
        self.finish_spinner(phase);
        self.print_line(format!("{} {} {}", CROSS, style(phase).red().bold(), reason));
    }

    /// Record a skipped phase, whether or not it ever started.
    pub fn phase_skipped(&self, phase: &str, reason: &str) {
        self.finish_spinner(phase);
        self.print_line(format!(
            "{} {} {}",
            SKIP,
            style(phase).dim(),
            style(reason).dim()
        ));
    }

    /// Announce that scheduling stopped.
    pub fn halted(&self, reason: &str) {
        self.print_line(format!("{} {}", STOP, style(reason).red().bold()));
    }

    /// Finish the run bar with the verdict.
    pub fn finish(&self, score: f64, max_score: u32, tier: ReadinessTier) {
        let verdict = match tier {
            ReadinessTier::Ready => style(tier.label()).green().bold(),
            ReadinessTier::Conditional => style(tier.label()).yellow().bold(),
            ReadinessTier::NeedsImprovement => style(tier.label()).red().bold(),
        };
        self.run_bar
            .finish_with_message(format!("{} {:.1}/{} {}", SPARKLE, score, max_score, verdict));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spinner_count(ui: &OrchestratorUI) -> usize {
        ui.spinners.lock().unwrap().len()
    }

    #[test]
    fn test_spinner_lifecycle() {
        let ui = OrchestratorUI::new(2, true);

        ui.start_phase("build", "compile");
        ui.start_phase("unit_tests", "cargo test");
        assert_eq!(spinner_count(&ui), 2);

        ui.attempt_started("build", 1, 3, Duration::from_millis(500));
        ui.attempt_failed("build", 1, Duration::from_millis(10), "exit 1");
        ui.phase_succeeded("build", 100.0, 100);
        ui.phase_failed("unit_tests", "3 tests failed");
        assert_eq!(spinner_count(&ui), 0);
        assert_eq!(ui.run_bar.position(), 2);

        ui.finish(100.0, 200, ReadinessTier::NeedsImprovement);
        assert!(ui.run_bar.is_finished());
    }

    #[test]
    fn test_skip_without_start_still_counts() {
        let ui = OrchestratorUI::new(1, false);
        ui.phase_skipped("stress", "disabled");
        assert_eq!(ui.run_bar.position(), 1);
    }
}
