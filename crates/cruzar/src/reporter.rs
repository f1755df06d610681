//! Spec reporters.
//!
//! The engine reports through this seam; the default console reporter
//! prints one line per spec and a final summary. Failed expectations
//! are only ever printed here — the coordinator re-raises them without
//! logging them again.

use crate::engine::{FailureRecord, RunSummary};
use console::style;
use std::time::Duration;

/// Receives execution progress and the final summary
pub trait SpecReporter: Send + Sync {
    /// A spec is about to run
    fn spec_started(&self, _full_name: &str) {}

    /// A spec passed
    fn spec_passed(&self, _full_name: &str, _duration: Duration) {}

    /// A spec failed
    fn spec_failed(&self, _full_name: &str, _failure: &FailureRecord) {}

    /// A spec was skipped with a reason
    fn spec_skipped(&self, _full_name: &str, _reason: &str) {}

    /// The whole tree finished
    fn run_done(&self, _summary: &RunSummary) {}
}

/// Default reporter printing colored per-spec lines and a summary
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Create a console reporter
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SpecReporter for ConsoleReporter {
    fn spec_passed(&self, full_name: &str, duration: Duration) {
        println!(
            "  {} {} {}",
            style("✓").green(),
            full_name,
            style(format!("({}ms)", duration.as_millis())).dim()
        );
    }

    fn spec_failed(&self, full_name: &str, failure: &FailureRecord) {
        println!("  {} {}", style("✗").red(), full_name);
        println!("      {}", style(&failure.message).red());
    }

    fn spec_skipped(&self, full_name: &str, reason: &str) {
        println!(
            "  {} {} {}",
            style("-").dim(),
            style(full_name).dim(),
            style(format!("({reason})")).dim()
        );
    }

    fn run_done(&self, summary: &RunSummary) {
        let verdict = if summary.all_passed() {
            style("ok").green()
        } else {
            style("failed").red()
        };
        println!(
            "\n{verdict}: {} specs, {} passed, {} failed, {} skipped, {} failure(s) in {:.2}s",
            summary.total,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.failures.len(),
            summary.duration.as_secs_f64()
        );
    }
}

/// Reporter that discards everything; used by tests
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl SpecReporter for NullReporter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_reporter_is_safe_to_call() {
        let reporter = ConsoleReporter::new();
        reporter.spec_started("group spec");
        reporter.spec_passed("group spec", Duration::from_millis(3));
        reporter.spec_skipped("group other", "not today");
        reporter.spec_failed(
            "group bad",
            &FailureRecord::spec("group bad", "expected 1, got 2"),
        );
        reporter.run_done(&RunSummary::default());
    }
}
