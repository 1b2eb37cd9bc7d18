//! Integration tests running directive-annotated scripts through the
//! fixture engine

use jit_harness::classify::ExecutionOutcome;
use jit_harness::fault::{Injection, SweepStop};
use jit_harness::harness::Discovered;
use jit_harness::report::{EXIT_CONFIGURATION_ERRORS, EXIT_FAILURES};
use jit_harness::{BatchReport, Classification, Harness, HarnessConfig, ThreadType, TraceEvent};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FIXTURE_ENGINE: &str = env!("CARGO_BIN_EXE_fixture-engine");

fn config() -> HarnessConfig {
    HarnessConfig {
        engine: Some(PathBuf::from(FIXTURE_ENGINE)),
        jobs: 2,
        timeout_ms: 10_000,
        ..HarnessConfig::default()
    }
}

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn run_with(config: HarnessConfig, dir: &Path) -> BatchReport {
    let harness = Harness::new(config).unwrap();
    harness.run(dir, |_| {}).unwrap()
}

fn run_single(config: HarnessConfig, content: &str) -> ExecutionOutcome {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "test.js", content);
    let report = run_with(config, temp_dir.path());
    assert_eq!(report.total, 1);
    report.get("test.js").unwrap().clone()
}

#[test]
fn test_plain_script_passes() {
    let outcome = run_single(config(), "print hello\nalloc 5\n");
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.stdout.contains("hello"));
    assert!(outcome.diagnostic.is_none());
}

#[test]
fn test_skip_without_helper_threads() {
    let mut config = config();
    config
        .engine_env
        .insert("FIXTURE_HELPER_THREADS".to_string(), "0".to_string());
    let outcome = run_single(
        config,
        "// |jit-test| skip-if: helperThreadCount() === 0\nprint ran\n",
    );
    assert_eq!(outcome.classification, Classification::Skip);
    assert!(outcome.stdout.is_empty());
    assert!(outcome.reason().contains("helperThreadCount() === 0"));
}

#[test]
fn test_runs_with_helper_threads() {
    let outcome = run_single(
        config(),
        "// |jit-test| skip-if: helperThreadCount() === 0\nprint ran\n",
    );
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.stdout.contains("ran"));
}

#[test]
fn test_caught_injection_passes() {
    let outcome = run_single(config(), "// |jit-test| oom-at=11\ncatch\nalloc 20\n");
    assert_eq!(outcome.classification, Classification::Pass);
    assert_eq!(
        outcome.injections,
        vec![Injection {
            thread: ThreadType::Main,
            index: 11
        }]
    );
    assert!(outcome.stdout.contains("caught: InternalError: out of memory"));
}

#[test]
fn test_same_script_without_injection_passes() {
    let outcome = run_single(config(), "catch\nalloc 20\n");
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.injections.is_empty());
}

#[test]
fn test_uncaught_injection_fails_without_allow_oom() {
    let outcome = run_single(config(), "// |jit-test| oom-at=2\nalloc 5\n");
    assert_eq!(outcome.classification, Classification::Fail);
    assert!(outcome.reason().contains("uncaught exception"));
}

#[test]
fn test_error_kind_mismatch_fails() {
    let outcome = run_single(
        config(),
        "// |jit-test| error=TypeError; error-message=/too many arguments/\n\
         throw SyntaxError: too many arguments\n",
    );
    assert_eq!(outcome.classification, Classification::Fail);
    assert!(!outcome.matched_expectation);
    let diagnostic = outcome.diagnostic.unwrap();
    assert_eq!(diagnostic.reason, "error kind mismatch");
    assert_eq!(diagnostic.expected.as_deref(), Some("TypeError"));
    assert!(diagnostic.actual.unwrap().starts_with("SyntaxError"));
}

#[test]
fn test_expected_error_passes() {
    let outcome = run_single(
        config(),
        "// |jit-test| error=TypeError; error-message=/too many/\n\
         throw TypeError: too many arguments\n",
    );
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.matched_expectation);
}

#[test]
fn test_missing_expected_error_fails() {
    let outcome = run_single(config(), "// |jit-test| error=RangeError\nprint fine\n");
    assert_eq!(outcome.classification, Classification::Fail);
    assert!(outcome.reason().contains("expected error was not thrown"));
}

#[test]
fn test_timeout_is_enforced() {
    let config = HarnessConfig {
        timeout_ms: 300,
        ..config()
    };
    let outcome = run_single(config, "sleep 5000\n");
    assert_eq!(outcome.classification, Classification::Timeout);
    assert!(outcome.elapsed_ms >= 300);
    assert!(outcome.elapsed_ms < 5000);
}

#[test]
fn test_allow_oom_sweep_stops_when_allocations_run_out() {
    let outcome = run_single(config(), "// |jit-test| allow-oom\nalloc 3\n");
    assert_eq!(outcome.classification, Classification::Pass);
    let indices: Vec<u64> = outcome.sweep.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(outcome
        .sweep
        .iter()
        .all(|p| p.classification == Classification::Pass));
    assert_eq!(outcome.sweep_stop, Some(SweepStop::Exhausted { index: 4 }));
}

#[test]
fn test_sweep_reports_most_severe_run() {
    // The first injected run escapes as an allowed OOM; every later run exits 5.
    let outcome = run_single(
        config(),
        "// |jit-test| allow-oom\nalloc 1\ncatch\nalloc 1\nexit 5\n",
    );
    let classifications: Vec<Classification> =
        outcome.sweep.iter().map(|p| p.classification).collect();
    assert_eq!(
        classifications,
        vec![Classification::Pass, Classification::Crash]
    );
    assert_eq!(outcome.classification, Classification::Crash);
    assert!(outcome.reason().starts_with("allocation 2: "));
    assert_eq!(outcome.sweep_stop, Some(SweepStop::Exhausted { index: 3 }));
}

#[test]
fn test_sweep_folds_run_without_injection() {
    let outcome = run_single(
        config(),
        "// |jit-test| allow-oom\nalloc 1\nthrow TypeError: late failure\n",
    );
    assert_eq!(outcome.sweep.len(), 1);
    assert_eq!(outcome.sweep[0].classification, Classification::Pass);
    assert_eq!(outcome.classification, Classification::Fail);
    assert!(outcome
        .reason()
        .starts_with("without injection: uncaught exception"));
    assert_eq!(outcome.sweep_stop, Some(SweepStop::Exhausted { index: 2 }));
}

#[test]
fn test_crash_flag() {
    let outcome = run_single(config(), "// |jit-test| crash\ncrash\n");
    assert_eq!(outcome.classification, Classification::Pass);

    let outcome = run_single(config(), "crash\n");
    assert_eq!(outcome.classification, Classification::Crash);

    let outcome = run_single(config(), "// |jit-test| crash\nprint survived\n");
    assert_eq!(outcome.classification, Classification::Fail);
}

#[test]
fn test_exit_status_expectation() {
    let outcome = run_single(config(), "// |jit-test| exitstatus=7\nexit 7\n");
    assert_eq!(outcome.classification, Classification::Pass);

    let outcome = run_single(config(), "// |jit-test| exitstatus=7\nexit 0\n");
    assert_eq!(outcome.classification, Classification::Fail);
    assert!(outcome.reason().contains("exit status mismatch"));

    let outcome = run_single(config(), "exit 9\n");
    assert_eq!(outcome.classification, Classification::Crash);
}

#[test]
fn test_engine_flags_and_gc_zeal_reach_the_engine() {
    let outcome = run_single(config(), "// |jit-test| --no-ion; gc-zeal=2,50\nprint ok\n");
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.stdout.contains("engine-flag: --no-ion"));
    assert!(outcome.stdout.contains("gc-zeal: 2,50"));
}

#[test]
fn test_debugger_collects_main_realm_trace() {
    let outcome = run_single(
        config(),
        "// |jit-test| debugger\nload helper.js\ncall f\ncatch\nthrow TypeError: boom\n",
    );
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.stdout.contains("observing realm 0"));
    assert_eq!(outcome.traces.len(), 1);
    assert_eq!(outcome.traces[0].realm, 0);

    let events = outcome.traces[0].trace.events();
    assert_eq!(events.len(), 4);
    assert_eq!(
        events[0],
        TraceEvent::ScriptLoad {
            url: "helper.js".to_string()
        }
    );
    assert_eq!(
        events[1],
        TraceEvent::CallEntry {
            function: "f".to_string()
        }
    );
    assert!(matches!(events[3], TraceEvent::ExceptionThrown(_)));
}

#[test]
fn test_extra_realm_is_created() {
    let outcome = run_single(
        config(),
        "// |jit-test| realm=fresh-compartment; debugger\nrealm 1\ncall other\nrealm 0\ncall main\n",
    );
    assert_eq!(outcome.classification, Classification::Pass);
    let events = outcome.traces[0].trace.events();
    assert_eq!(
        events,
        &[
            TraceEvent::CallEntry {
                function: "main".to_string()
            },
            TraceEvent::CallExit {
                function: "main".to_string()
            },
        ]
    );
}

#[test]
fn test_worker_injection_needs_single_threaded_replay() {
    let content = "// |jit-test| oom-at=2; oom-thread=worker\ncatch\nalloc 4 worker\n";

    let outcome = run_single(config(), content);
    assert_eq!(outcome.classification, Classification::ConfigurationError);
    assert!(outcome.exit.is_none());

    let mut config = config();
    config
        .engine_env
        .insert("FIXTURE_SINGLE_THREADED_REPLAY".to_string(), "1".to_string());
    let outcome = run_single(config, content);
    assert_eq!(outcome.classification, Classification::Pass);
    assert!(outcome.stdout.contains("single-threaded"));
    assert_eq!(
        outcome.injections,
        vec![Injection {
            thread: ThreadType::Worker,
            index: 2
        }]
    );
}

#[test]
fn test_malformed_directive_is_configuration_error() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "bad.js", "// |jit-test| bogus-flag\nprint x\n");
    write(temp_dir.path(), "good.js", "print x\n");

    let report = run_with(config(), temp_dir.path());
    assert_eq!(report.total, 2);
    assert_eq!(report.passed, 1);
    assert_eq!(report.configuration_errors, 1);
    let bad = report.get("bad.js").unwrap();
    assert!(bad.reason().contains("unknown directive `bogus-flag`"));
    assert_eq!(report.exit_code(), EXIT_CONFIGURATION_ERRORS);
}

#[test]
fn test_exit_code_combines_failures_and_config_errors() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "bad.js", "// |jit-test| oom-at=0\nprint x\n");
    write(temp_dir.path(), "fail.js", "throw Error: nope\n");

    let report = run_with(config(), temp_dir.path());
    assert_eq!(report.exit_code(), EXIT_FAILURES | EXIT_CONFIGURATION_ERRORS);
}

#[test]
fn test_discovery_sorts_and_excludes_lib() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "b/two.js", "print 2\n");
    write(temp_dir.path(), "a/one.js", "print 1\n");
    write(temp_dir.path(), "lib/helper.js", "print helper\n");
    write(temp_dir.path(), "a/notes.txt", "not a test\n");

    let harness = Harness::new(config()).unwrap();
    let found = harness.discover(temp_dir.path()).unwrap();
    let ids: Vec<&str> = found.iter().map(Discovered::id).collect();
    assert_eq!(ids, vec!["a/one.js", "b/two.js"]);
}

#[test]
fn test_path_and_tag_filters() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "gc/one.js", "// |jit-test| slow\nprint 1\n");
    write(temp_dir.path(), "gc/two.js", "print 2\n");
    write(temp_dir.path(), "ion/three.js", "// |jit-test| tags=ion,wasm\nprint 3\n");

    let by_path = run_with(
        HarnessConfig {
            paths: vec!["gc/**".to_string()],
            ..config()
        },
        temp_dir.path(),
    );
    let ids: Vec<&str> = by_path.entries.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["gc/one.js", "gc/two.js"]);

    let by_tag = run_with(
        HarnessConfig {
            tags: vec!["slow".to_string(), "wasm".to_string()],
            ..config()
        },
        temp_dir.path(),
    );
    let ids: Vec<&str> = by_tag.entries.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["gc/one.js", "ion/three.js"]);
}

#[test]
fn test_cancelled_batch_marks_every_test() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "a.js", "print a\n");
    write(temp_dir.path(), "b.js", "print b\n");

    let harness = Harness::new(config()).unwrap();
    harness.cancellation_token().cancel();
    let report = harness.run(temp_dir.path(), |_| {}).unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.exit_code(), EXIT_FAILURES);
}

#[test]
fn test_capabilities_file_overrides_query() {
    let temp_dir = TempDir::new().unwrap();
    let caps = temp_dir.path().join("caps.yaml");
    fs::write(&caps, "helper_thread_count: 0\nfeatures: []\n").unwrap();

    let tests = temp_dir.path().join("tests");
    write(&tests, "t.js", "// |jit-test| skip-if: helperThreadCount() == 0\nprint x\n");

    let report = run_with(
        HarnessConfig {
            capabilities: Some(caps),
            ..config()
        },
        &tests,
    );
    assert_eq!(report.skipped, 1);
}

#[test]
fn test_progress_sees_every_outcome() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "a.js", "print a\n");
    write(temp_dir.path(), "b.js", "// |jit-test| nope\n");
    write(temp_dir.path(), "c.js", "// |jit-test| skip-if: true\n");

    let harness = Harness::new(config()).unwrap();
    let mut seen = Vec::new();
    let report = harness
        .run(temp_dir.path(), |outcome| seen.push(outcome.test.clone()))
        .unwrap();
    seen.sort();
    assert_eq!(seen, vec!["a.js", "b.js", "c.js"]);
    assert_eq!(report.total, 3);
}

#[test]
fn test_report_json_round_trip_after_run() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "oom.js", "// |jit-test| allow-oom\nalloc 2\n");
    let report = run_with(config(), temp_dir.path());
    let json = report.to_json().unwrap();
    assert!(json.contains("\"sweep_stop\""));
    assert_eq!(BatchReport::from_json(&json).unwrap(), report);
}
