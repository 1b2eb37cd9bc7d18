//! Unit tests for fault injection planning

use jit_harness::fault::{
    AllocationCounter, FaultSchedule, GcZeal, PlanError, PlanStrategy, SweepStop,
    DEFAULT_SWEEP_BOUND,
};
use jit_harness::{
    CapabilityEnvironment, Classification, DirectiveSet, EngineConfig, FaultInjectionPlan,
    FaultPlanner, Harness, HarnessConfig, InjectionMode, InjectionPoint, TestCase, ThreadType,
};

fn plan(line: &str, planner: &FaultPlanner) -> Result<FaultSchedule, PlanError> {
    planner.plan(&DirectiveSet::parse_pragma_line(line, 1).unwrap())
}

fn fire_pattern(plan: &FaultInjectionPlan, allocations: usize) -> Vec<bool> {
    let mut counter = AllocationCounter::new(Some(plan.clone()));
    (0..allocations)
        .map(|_| counter.allocate(ThreadType::Main))
        .collect()
}

#[test]
fn test_no_oom_directives_means_no_injection() {
    let schedule = plan("// |jit-test| slow", &FaultPlanner::default()).unwrap();
    assert_eq!(schedule.strategy, PlanStrategy::None);
    assert_eq!(schedule.gc_zeal, None);
    assert!(!schedule.requires_single_threaded());
}

#[test]
fn test_explicit_plan_from_oom_at() {
    let schedule = plan("// |jit-test| oom-at=3,7", &FaultPlanner::default()).unwrap();
    let PlanStrategy::Explicit(explicit) = schedule.strategy else {
        panic!("expected an explicit plan");
    };
    assert_eq!(
        explicit.points(),
        &[
            InjectionPoint::new(3, ThreadType::Main, InjectionMode::OneShot),
            InjectionPoint::new(7, ThreadType::Main, InjectionMode::OneShot),
        ]
    );
}

#[test]
fn test_single_shot_is_deterministic() {
    let schedule = plan("// |jit-test| oom-at=4", &FaultPlanner::default()).unwrap();
    let PlanStrategy::Explicit(explicit) = schedule.strategy else {
        panic!("expected an explicit plan");
    };
    let first = fire_pattern(&explicit, 10);
    let second = fire_pattern(&explicit, 10);
    assert_eq!(first, second);
    assert_eq!(first.iter().filter(|f| **f).count(), 1);
    assert!(first[3]);
}

#[test]
fn test_rearm_overrides_default_mode() {
    let schedule = plan("// |jit-test| oom-at=2; oom-rearm", &FaultPlanner::default()).unwrap();
    let PlanStrategy::Explicit(explicit) = schedule.strategy else {
        panic!("expected an explicit plan");
    };
    assert_eq!(explicit.points()[0].mode, InjectionMode::Rearm);
    assert_eq!(fire_pattern(&explicit, 4), vec![false, true, false, true]);
}

#[test]
fn test_configured_default_mode_applies() {
    let planner = FaultPlanner::new(InjectionMode::Rearm, DEFAULT_SWEEP_BOUND, false);
    let schedule = plan("// |jit-test| oom-at=5", &planner).unwrap();
    let PlanStrategy::Explicit(explicit) = schedule.strategy else {
        panic!("expected an explicit plan");
    };
    assert_eq!(explicit.points()[0].mode, InjectionMode::Rearm);

    let schedule = plan("// |jit-test| oom-at=5; oom-oneshot", &planner).unwrap();
    let PlanStrategy::Explicit(explicit) = schedule.strategy else {
        panic!("expected an explicit plan");
    };
    assert_eq!(explicit.points()[0].mode, InjectionMode::OneShot);
}

#[test]
fn test_conflicting_modes_rejected() {
    let err = plan("// |jit-test| oom-at=1; oom-rearm; oom-oneshot", &FaultPlanner::default())
        .unwrap_err();
    assert_eq!(err, PlanError::ConflictingModes);
}

#[test]
fn test_zero_index_rejected() {
    let err = plan("// |jit-test| oom-at=0", &FaultPlanner::default()).unwrap_err();
    assert_eq!(err, PlanError::ZeroIndex);
}

#[test]
fn test_decreasing_indices_rejected() {
    let err = plan("// |jit-test| oom-at=9,4", &FaultPlanner::default()).unwrap_err();
    assert_eq!(err, PlanError::NotIncreasing { previous: 9, index: 4 });
}

#[test]
fn test_orphaned_thread_directive() {
    let err = plan("// |jit-test| oom-thread=main", &FaultPlanner::default()).unwrap_err();
    assert!(matches!(err, PlanError::OrphanedDirective("oom-thread")));
}

#[test]
fn test_allow_oom_without_indices_sweeps() {
    let planner = FaultPlanner::new(InjectionMode::OneShot, 50, false);
    let schedule = plan("// |jit-test| allow-oom", &planner).unwrap();
    let PlanStrategy::Sweep(sweep) = schedule.strategy else {
        panic!("expected a sweep");
    };
    assert_eq!(sweep.bound, 50);
    assert_eq!(sweep.thread, ThreadType::Main);
}

#[test]
fn test_sweep_cursor_stops_when_injection_does_not_fire() {
    let planner = FaultPlanner::new(InjectionMode::OneShot, 100, false);
    let PlanStrategy::Sweep(sweep) = plan("// |jit-test| allow-oom", &planner).unwrap().strategy
    else {
        panic!("expected a sweep");
    };

    let mut cursor = sweep.cursor();
    let mut tried = Vec::new();
    while let Some(step) = cursor.step() {
        let mut counter = AllocationCounter::new(Some(step.plan));
        let fired = (0..3).any(|_| counter.allocate(ThreadType::Main));
        cursor.record(step.index, fired);
        tried.push(step.index);
        if !fired {
            break;
        }
    }
    assert_eq!(tried, vec![1, 2, 3, 4]);
    assert_eq!(cursor.stop_reason(), Some(SweepStop::Exhausted { index: 4 }));
    assert!(cursor.step().is_none());
}

#[test]
fn test_sweep_cursor_bound() {
    let planner = FaultPlanner::new(InjectionMode::OneShot, 2, false);
    let PlanStrategy::Sweep(sweep) = plan("// |jit-test| allow-oom", &planner).unwrap().strategy
    else {
        panic!("expected a sweep");
    };
    let mut cursor = sweep.cursor();
    while let Some(step) = cursor.step() {
        cursor.record(step.index, true);
    }
    assert_eq!(cursor.stop_reason(), Some(SweepStop::BoundReached { bound: 2 }));
}

#[test]
fn test_gc_zeal_scheduled() {
    let schedule = plan("// |jit-test| gc-zeal=4,10", &FaultPlanner::default()).unwrap();
    assert_eq!(schedule.gc_zeal, Some(GcZeal { mode: 4, frequency: 10 }));
    assert_eq!(schedule.strategy, PlanStrategy::None);
}

#[test]
fn test_concurrent_thread_requires_single_threaded_replay() {
    let line = "// |jit-test| oom-at=5; oom-thread=worker";
    let err = plan(line, &FaultPlanner::default()).unwrap_err();
    assert_eq!(err, PlanError::ConcurrentThread(ThreadType::Worker));

    let planner = FaultPlanner::new(InjectionMode::OneShot, DEFAULT_SWEEP_BOUND, true);
    let schedule = plan(line, &planner).unwrap();
    assert!(schedule.requires_single_threaded());
}

#[test]
fn test_worker_injection_is_configuration_error_before_running() {
    let config = HarnessConfig {
        jobs: 1,
        ..HarnessConfig::default()
    };
    let harness = Harness::with_environment(
        config,
        EngineConfig::new("/nonexistent/engine"),
        CapabilityEnvironment::new(),
    )
    .unwrap();
    let test = TestCase::from_source(
        "worker.js",
        "/tmp/worker.js",
        "// |jit-test| oom-at=3; oom-thread=worker\nalloc 10 worker\n",
    )
    .unwrap();

    let outcome = harness.prepare(test).unwrap_err();
    assert_eq!(outcome.classification, Classification::ConfigurationError);
    assert!(outcome.exit.is_none());
    assert!(outcome.injections.is_empty());
    assert!(outcome.reason().contains("single-threaded replay"));
}
