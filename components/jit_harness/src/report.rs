//! Aggregated results of a batch and the exit status they map to.

use crate::classify::{Classification, ExecutionOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exit status bit for failing tests
pub const EXIT_FAILURES: i32 = 1;
/// Exit status bit for configuration errors
pub const EXIT_CONFIGURATION_ERRORS: i32 = 2;
/// Exit status of a harness that could not start
pub const EXIT_FATAL: i32 = 4;

/// Batch report with statistics and per-test outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Total number of tests discovered
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub crashed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub configuration_errors: usize,
    pub cancelled: usize,
    /// Every outcome, keyed and sorted by test identity
    pub entries: BTreeMap<String, ExecutionOutcome>,
}

impl BatchReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&mut self, classification: Classification) -> &mut usize {
        match classification {
            Classification::Pass => &mut self.passed,
            Classification::Fail => &mut self.failed,
            Classification::Crash => &mut self.crashed,
            Classification::Timeout => &mut self.timed_out,
            Classification::Skip => &mut self.skipped,
            Classification::ConfigurationError => &mut self.configuration_errors,
            Classification::Cancelled => &mut self.cancelled,
        }
    }

    /// Number of tests with the given classification
    pub fn count(&self, classification: Classification) -> usize {
        match classification {
            Classification::Pass => self.passed,
            Classification::Fail => self.failed,
            Classification::Crash => self.crashed,
            Classification::Timeout => self.timed_out,
            Classification::Skip => self.skipped,
            Classification::ConfigurationError => self.configuration_errors,
            Classification::Cancelled => self.cancelled,
        }
    }

    /// Add an outcome. A second outcome for the same test replaces the first.
    pub fn add_outcome(&mut self, outcome: ExecutionOutcome) {
        *self.counter(outcome.classification) += 1;
        match self.entries.insert(outcome.test.clone(), outcome) {
            Some(previous) => *self.counter(previous.classification) -= 1,
            None => self.total += 1,
        }
    }

    /// Outcome of one test
    pub fn get(&self, test: &str) -> Option<&ExecutionOutcome> {
        self.entries.get(test)
    }

    /// Every non-PASS outcome, in identity order
    pub fn non_passing(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.entries
            .values()
            .filter(|o| o.classification != Classification::Pass)
    }

    /// Outcomes that fail the batch, in identity order
    pub fn failures(&self) -> Vec<&ExecutionOutcome> {
        self.entries
            .values()
            .filter(|o| o.classification.is_failure())
            .collect()
    }

    /// Calculate the pass rate as a percentage
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    /// Calculate the effective pass rate (excluding skips)
    pub fn effective_pass_rate(&self) -> f64 {
        let executed = self.total - self.skipped;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }

    /// Generate a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Results:\n\
             Total: {}\n\
             Passed: {} ({:.1}%)\n\
             Failed: {}\n\
             Crashed: {}\n\
             Timeout: {}\n\
             Skipped: {}\n\
             Configuration errors: {}\n\
             Cancelled: {}\n\
             Effective Pass Rate: {:.1}%",
            self.total,
            self.passed,
            self.pass_rate(),
            self.failed,
            self.crashed,
            self.timed_out,
            self.skipped,
            self.configuration_errors,
            self.cancelled,
            self.effective_pass_rate()
        )
    }

    /// Generate a detailed report including every non-PASS test
    pub fn detailed_summary(&self) -> String {
        let mut output = self.summary();

        let problems: Vec<_> = self
            .non_passing()
            .filter(|o| o.classification != Classification::Skip)
            .collect();
        if !problems.is_empty() {
            output.push_str("\n\nProblems:\n");
            for outcome in problems {
                output.push_str(&format!(
                    "  - [{}] {}\n    Reason: {}\n",
                    outcome.classification,
                    outcome.test,
                    outcome.reason()
                ));
                for point in outcome.sweep.iter().filter(|p| p.classification != Classification::Pass) {
                    output.push_str(&format!(
                        "    allocation {}: {}\n",
                        point.index, point.classification
                    ));
                }
            }
        }

        output
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: &BatchReport) {
        for outcome in other.entries.values() {
            self.add_outcome(outcome.clone());
        }
    }

    /// Whether every non-skipped test passed
    pub fn is_success(&self) -> bool {
        self.passed + self.skipped == self.total
    }

    /// Process exit status for this report
    pub fn exit_code(&self) -> i32 {
        let mut code = 0;
        if self.failed + self.crashed + self.timed_out + self.cancelled > 0 {
            code |= EXIT_FAILURES;
        }
        if self.configuration_errors > 0 {
            code |= EXIT_CONFIGURATION_ERRORS;
        }
        code
    }

    /// Export report as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Import report from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
