//! Batch orchestration: discovery, load-time checks, dispatch and fuzz sweeps.

use crate::cancel::CancellationToken;
use crate::capability::{CapabilityEnvironment, CapabilityReport};
use crate::classify::{
    classify, most_severe, Diagnostic, ExecutionOutcome, Expectation, RealmTrace, SweepPoint,
    Verdict,
};
use crate::config::HarnessConfig;
use crate::directive::{Flag, OptionKey};
use crate::engine::{EngineConfig, Invocation};
use crate::error::{HarnessError, HarnessResult};
use crate::fault::{AllocationCounter, FaultPlanner, FaultSchedule, PlanStrategy, SweepPlan};
use crate::filter::TestFilter;
use crate::protocol::{parse_stderr, WorkerRecord};
use crate::realm::{Isolation, IsolationKind, RealmArena, RealmOptions};
use crate::report::BatchReport;
use crate::scheduler::{Executor, Scheduler};
use crate::test_case::{identity, LoadError, SkipVerdict, TestCase};
use crate::worker::{run_isolated, RawOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A file found during discovery
#[derive(Debug)]
pub enum Discovered {
    Loaded(TestCase),
    Broken { id: String, error: LoadError },
}

impl Discovered {
    pub fn id(&self) -> &str {
        match self {
            Discovered::Loaded(test) => test.id(),
            Discovered::Broken { id, .. } => id,
        }
    }
}

/// A test that passed every load-time check and is ready to run
#[derive(Debug)]
pub struct PreparedTest {
    pub test: TestCase,
    pub schedule: FaultSchedule,
    pub expectation: Expectation,
    pub timeout: Duration,
    pub extra_realm: Option<IsolationKind>,
}

/// Everything one worker run produced
#[derive(Debug)]
struct RunResult {
    raw: RawOutcome,
    verdict: Verdict,
    counter: AllocationCounter,
    traces: Vec<RealmTrace>,
}

impl RunResult {
    fn into_outcome(self, test: &str) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::from_run(test, self.raw, self.verdict);
        outcome.injections = self.counter.injections().to_vec();
        outcome.traces = self.traces;
        outcome
    }
}

/// Directive-driven conformance harness
pub struct Harness {
    config: HarnessConfig,
    engine: EngineConfig,
    environment: Arc<CapabilityEnvironment>,
    planner: FaultPlanner,
    filter: TestFilter,
    cancel: CancellationToken,
}

impl Harness {
    /// Create a harness, building the capability environment from the
    /// configured report file or by querying the runtime.
    pub fn new(config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let program = config
            .engine
            .clone()
            .ok_or_else(|| HarnessError::Config("no engine configured".to_string()))?;
        let mut engine = EngineConfig::new(program).with_args(config.engine_args.iter().cloned());
        for (key, value) in &config.engine_env {
            engine = engine.with_env(key.clone(), value.clone());
        }

        let report = match &config.capabilities {
            Some(path) => CapabilityReport::load(path)?,
            None => engine.query_capabilities(config.timeout())?,
        };
        Self::with_environment(config, engine, CapabilityEnvironment::from_report(&report))
    }

    /// Create a harness with a ready-made capability environment.
    pub fn with_environment(
        config: HarnessConfig,
        engine: EngineConfig,
        environment: CapabilityEnvironment,
    ) -> HarnessResult<Self> {
        config.validate()?;
        let planner = FaultPlanner::new(
            config.injection_mode,
            config.sweep_bound,
            environment.single_threaded_replay(),
        );
        let filter = TestFilter::new(&config.paths, &config.tags)?;
        Ok(Self {
            config,
            engine,
            environment: Arc::new(environment),
            planner,
            filter,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn environment(&self) -> &Arc<CapabilityEnvironment> {
        &self.environment
    }

    /// Token that cancels the running batch
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Find and load every selected test below `root`, sorted by identity.
    pub fn discover(&self, root: &Path) -> HarnessResult<Vec<Discovered>> {
        let metadata = std::fs::metadata(root).map_err(|e| HarnessError::io(root, e))?;
        let base = if metadata.is_file() {
            root.parent().unwrap_or(root)
        } else {
            root
        };

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.depth() > 0
                    && e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .map(|name| self.config.is_excluded_dir(name))
                        .unwrap_or(false))
            });

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.config.is_test_file(entry.path()) {
                continue;
            }
            let id = identity(base, entry.path());
            if !self.filter.matches_path(&id) {
                continue;
            }
            match TestCase::load(base, entry.path()) {
                Ok(test) => {
                    if self.filter.matches(&test) {
                        found.push(Discovered::Loaded(test));
                    }
                }
                Err(error) => {
                    if self.config.tags.is_empty() {
                        found.push(Discovered::Broken { id, error });
                    }
                }
            }
        }
        found.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(found)
    }

    /// Run load-time checks. A test that cannot run yields its outcome.
    pub fn prepare(&self, test: TestCase) -> Result<PreparedTest, ExecutionOutcome> {
        if let SkipVerdict::Skip { reason } = test.skip_verdict(&self.environment) {
            return Err(ExecutionOutcome::skipped(test.id(), reason.clone()));
        }
        let schedule = self.planner.plan(test.directives()).map_err(|e| {
            ExecutionOutcome::configuration_error(test.id(), format!("fault injection: {}", e))
        })?;
        let expectation = Expectation::from_directives(test.directives())
            .map_err(|e| ExecutionOutcome::configuration_error(test.id(), e))?;
        let extra_realm = test
            .directives()
            .option(OptionKey::Realm)
            .map(str::parse::<IsolationKind>)
            .transpose()
            .map_err(|e| ExecutionOutcome::configuration_error(test.id(), e.to_string()))?;

        Ok(PreparedTest {
            timeout: self.config.timeout_for(&test),
            test,
            schedule,
            expectation,
            extra_realm,
        })
    }

    /// Discover, schedule and classify every test below `root`.
    ///
    /// `progress` sees each outcome as soon as it is known; the returned
    /// report is ordered by test identity.
    pub fn run<P>(&self, root: &Path, mut progress: P) -> HarnessResult<BatchReport>
    where
        P: FnMut(&ExecutionOutcome),
    {
        let discovered = self.discover(root)?;
        info!(root = %root.display(), tests = discovered.len(), "discovered tests");

        let mut report = BatchReport::new();
        let mut jobs = Vec::new();
        for item in discovered {
            let ready = match item {
                Discovered::Loaded(test) => self.prepare(test),
                Discovered::Broken { id, error } => {
                    Err(ExecutionOutcome::configuration_error(id, error.to_string()))
                }
            };
            match ready {
                Ok(job) => jobs.push(job),
                Err(outcome) => {
                    progress(&outcome);
                    report.add_outcome(outcome);
                }
            }
        }

        let scheduler = Scheduler::new(self.config.jobs, self.config.heavy_jobs);
        info!(jobs = jobs.len(), workers = scheduler.jobs(), "scheduling tests");
        for outcome in scheduler.run(self, jobs, &self.cancel, &mut progress) {
            report.add_outcome(outcome);
        }

        info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed + report.crashed + report.timed_out,
            "batch finished"
        );
        Ok(report)
    }

    fn run_once(
        &self,
        job: &PreparedTest,
        counter: AllocationCounter,
        cancel: &CancellationToken,
    ) -> Result<RunResult, String> {
        let test = &job.test;
        let mut arena = RealmArena::new();
        let main = arena
            .create_realm(
                RealmOptions::new(Isolation::FreshGlobal).with_gc_zeal(job.schedule.gc_zeal),
            )
            .map_err(|e| e.to_string())?;
        let observer = if test.directives().has_flag(Flag::Debugger) {
            Some(arena.attach_observer(main).map_err(|e| e.to_string())?)
        } else {
            None
        };
        if let Some(kind) = job.extra_realm {
            let isolation = match kind {
                IsolationKind::FreshGlobal => Isolation::FreshGlobal,
                IsolationKind::FreshCompartment => Isolation::FreshCompartment,
                IsolationKind::SameZone => Isolation::SameZoneAs(main),
            };
            arena
                .create_realm(RealmOptions::new(isolation))
                .map_err(|e| e.to_string())?;
        }

        let invocation = Invocation {
            script: test.path().to_path_buf(),
            engine_args: test.directives().engine_args(),
            plan: counter.plan().cloned(),
            single_threaded: job.schedule.requires_single_threaded(),
            gc_zeal: job.schedule.gc_zeal,
            realms: arena.specs(),
        };
        let command = self.engine.command(&invocation).map_err(|e| e.to_string())?;
        debug!(test = %test.id(), plan = ?invocation.plan, "dispatching");
        let raw = run_isolated(command, job.timeout, cancel)
            .map_err(|e| format!("cannot launch {}: {}", self.engine.program.display(), e))?;

        let output = parse_stderr(&raw.stderr);
        for anomaly in &output.anomalies {
            warn!(test = %test.id(), %anomaly, "ignoring worker record");
        }
        let mut counter = counter;
        for record in &output.records {
            match record {
                WorkerRecord::Allocations { thread, count } => {
                    counter.record_allocations(*thread, *count)
                }
                WorkerRecord::OomInjected { thread, index } => {
                    counter.record_injection(*thread, *index)
                }
                WorkerRecord::Thrown(_) => {}
                WorkerRecord::Trace { realm, event } => {
                    let recorded = arena
                        .handle_for(*realm)
                        .map(|handle| arena.record(handle, event.clone()));
                    if !matches!(recorded, Some(Ok(_))) {
                        warn!(test = %test.id(), realm, "trace event for unknown realm");
                    }
                }
            }
        }

        let traces = match observer {
            Some(observer) => vec![RealmTrace {
                realm: main.index(),
                trace: arena.collect(observer).map_err(|e| e.to_string())?,
            }],
            None => Vec::new(),
        };
        arena.teardown();

        let verdict = classify(&raw, &output, &job.expectation);
        Ok(RunResult {
            raw,
            verdict,
            counter,
            traces,
        })
    }

    fn sweep(
        &self,
        job: &PreparedTest,
        sweep: SweepPlan,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let id = job.test.id();
        let mut cursor = sweep.cursor();
        let mut points = Vec::new();
        let mut worst: Option<(u64, RunResult)> = None;
        let mut last: Option<RunResult> = None;

        while let Some(step) = cursor.step() {
            let run = match self.run_once(job, AllocationCounter::new(Some(step.plan)), cancel) {
                Ok(run) => run,
                Err(reason) => return ExecutionOutcome::configuration_error(id, reason),
            };
            let interrupted = run.raw.timed_out || run.raw.cancelled;
            if interrupted {
                cursor.halt(step.index);
            } else {
                cursor.record(step.index, run.counter.fired());
                if !run.counter.fired() {
                    last = Some(run);
                    break;
                }
            }

            let classification = run.verdict.classification;
            debug!(test = %id, index = step.index, %classification, "sweep step");
            points.push(SweepPoint {
                index: step.index,
                classification,
                diagnostic: run.verdict.diagnostic.clone(),
            });
            let more_severe = worst
                .as_ref()
                .map_or(true, |(_, w)| classification.severity() > w.verdict.classification.severity());
            if more_severe {
                worst = Some((step.index, run));
            }
            if interrupted {
                break;
            }
        }

        let stop = cursor.stop_reason();
        let Some((index, worst)) = worst else {
            return match last {
                Some(run) => {
                    let mut outcome = run.into_outcome(id);
                    outcome.sweep_stop = stop;
                    outcome
                }
                None => ExecutionOutcome::cancelled(id),
            };
        };

        let classification = most_severe(
            points
                .iter()
                .map(|p| p.classification)
                .chain(last.as_ref().map(|run| run.verdict.classification)),
        );
        let (prefix, base) = match last {
            Some(run)
                if run.verdict.classification.severity()
                    > worst.verdict.classification.severity() =>
            {
                ("without injection".to_string(), run)
            }
            _ => (format!("allocation {}", index), worst),
        };
        let mut outcome = base.into_outcome(id);
        outcome.classification = classification;
        if let Some(diagnostic) = outcome.diagnostic.take() {
            outcome.diagnostic = Some(Diagnostic {
                reason: format!("{}: {}", prefix, diagnostic.reason),
                ..diagnostic
            });
        }
        outcome.sweep = points;
        outcome.sweep_stop = stop;
        outcome
    }
}

impl Executor for Harness {
    type Job = PreparedTest;

    fn is_heavy(&self, job: &PreparedTest) -> bool {
        job.test.is_heavy()
    }

    fn execute(&self, job: PreparedTest, cancel: &CancellationToken) -> ExecutionOutcome {
        let id = job.test.id().to_string();
        let plan = match &job.schedule.strategy {
            PlanStrategy::None => None,
            PlanStrategy::Explicit(plan) => Some(plan.clone()),
            PlanStrategy::Sweep(sweep) => return self.sweep(&job, *sweep, cancel),
        };
        match self.run_once(&job, AllocationCounter::new(plan), cancel) {
            Ok(run) => run.into_outcome(&id),
            Err(reason) => ExecutionOutcome::configuration_error(id, reason),
        }
    }

    fn cancelled(&self, job: PreparedTest) -> ExecutionOutcome {
        ExecutionOutcome::cancelled(job.test.id())
    }
}
