//! Unit tests for batch reports

use jit_harness::report::{EXIT_CONFIGURATION_ERRORS, EXIT_FAILURES};
use jit_harness::{BatchReport, Classification, ExecutionOutcome};

fn outcome(test: &str, classification: Classification) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome::skipped(test, "placeholder");
    outcome.classification = classification;
    outcome
}

#[test]
fn test_new_report() {
    let report = BatchReport::new();
    assert_eq!(report.total, 0);
    assert_eq!(report.passed, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 0);
    assert!(report.entries.is_empty());
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_counts_per_classification() {
    let mut report = BatchReport::new();
    for (i, classification) in Classification::ALL.into_iter().enumerate() {
        report.add_outcome(outcome(&format!("t{}.js", i), classification));
    }
    assert_eq!(report.total, Classification::ALL.len());
    for classification in Classification::ALL {
        assert_eq!(report.count(classification), 1, "{}", classification);
    }
}

#[test]
fn test_duplicate_outcome_replaces_previous() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::Fail));
    report.add_outcome(outcome("a.js", Classification::Pass));
    assert_eq!(report.total, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.passed, 1);
}

#[test]
fn test_entries_sorted_by_identity() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("z/last.js", Classification::Pass));
    report.add_outcome(outcome("a/first.js", Classification::Fail));
    report.add_outcome(outcome("m/mid.js", Classification::Skip));
    let ids: Vec<&str> = report.entries.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["a/first.js", "m/mid.js", "z/last.js"]);
}

#[test]
fn test_pass_rate_with_skips() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::Pass));
    report.add_outcome(outcome("b.js", Classification::Fail));
    report.add_outcome(outcome("c.js", Classification::Skip));
    report.add_outcome(outcome("d.js", Classification::Skip));
    assert_eq!(report.pass_rate(), 25.0);
    assert_eq!(report.effective_pass_rate(), 50.0);
}

#[test]
fn test_exit_code_bits() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::Pass));
    report.add_outcome(outcome("b.js", Classification::Skip));
    assert_eq!(report.exit_code(), 0);
    assert!(report.is_success());

    report.add_outcome(outcome("c.js", Classification::Timeout));
    assert_eq!(report.exit_code(), EXIT_FAILURES);

    report.add_outcome(outcome("d.js", Classification::ConfigurationError));
    assert_eq!(report.exit_code(), EXIT_FAILURES | EXIT_CONFIGURATION_ERRORS);
    assert!(!report.is_success());
}

#[test]
fn test_configuration_error_alone() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::ConfigurationError));
    assert_eq!(report.exit_code(), EXIT_CONFIGURATION_ERRORS);
}

#[test]
fn test_failures_exclude_skips_and_config_errors() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::Crash));
    report.add_outcome(outcome("b.js", Classification::Skip));
    report.add_outcome(outcome("c.js", Classification::ConfigurationError));
    report.add_outcome(outcome("d.js", Classification::Cancelled));
    let failures: Vec<&str> = report.failures().iter().map(|o| o.test.as_str()).collect();
    assert_eq!(failures, vec!["a.js", "d.js"]);
    assert_eq!(report.non_passing().count(), 4);
}

#[test]
fn test_merge_reports() {
    let mut first = BatchReport::new();
    first.add_outcome(outcome("a.js", Classification::Pass));
    first.add_outcome(outcome("b.js", Classification::Fail));

    let mut second = BatchReport::new();
    second.add_outcome(outcome("b.js", Classification::Pass));
    second.add_outcome(outcome("c.js", Classification::Crash));

    first.merge(&second);
    assert_eq!(first.total, 3);
    assert_eq!(first.passed, 2);
    assert_eq!(first.failed, 0);
    assert_eq!(first.crashed, 1);
}

#[test]
fn test_summary_mentions_counts() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::Pass));
    report.add_outcome(outcome("b.js", Classification::Crash));
    let summary = report.summary();
    assert!(summary.contains("Total: 2"));
    assert!(summary.contains("Crashed: 1"));
}

#[test]
fn test_detailed_summary_lists_problems_not_skips() {
    let mut report = BatchReport::new();
    report.add_outcome(ExecutionOutcome::configuration_error(
        "broken.js",
        "unknown directive `bogus`",
    ));
    report.add_outcome(ExecutionOutcome::skipped("skipped.js", "skip-if: true"));
    let detailed = report.detailed_summary();
    assert!(detailed.contains("broken.js"));
    assert!(detailed.contains("unknown directive"));
    assert!(!detailed.contains("skipped.js"));
}

#[test]
fn test_json_export_import() {
    let mut report = BatchReport::new();
    report.add_outcome(outcome("a.js", Classification::Pass));
    report.add_outcome(ExecutionOutcome::configuration_error("b.js", "bad oom-at"));

    let json = report.to_json().unwrap();
    assert!(json.contains("\"configuration-error\""));
    let imported = BatchReport::from_json(&json).unwrap();
    assert_eq!(imported, report);
}
