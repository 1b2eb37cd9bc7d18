//! Fault injection planning.
//!
//! Turns the OOM and GC-stress directives of a test into a deterministic
//! schedule: either an explicit list of allocation indices to fail, or an
//! iterative sweep that fails index 1, 2, 3, ... in fresh processes until
//! the test stops allocating enough to reach the next index.

use crate::directive::{DirectiveSet, Flag, OptionKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default number of runs in a fuzz sweep
pub const DEFAULT_SWEEP_BOUND: u64 = 1024;

/// Default GC zeal frequency when `gc-zeal` gives only a mode
pub const DEFAULT_ZEAL_FREQUENCY: u32 = 100;

/// Highest GC zeal mode the runtime understands
pub const MAX_ZEAL_MODE: u8 = 25;

/// Errors produced while planning fault injection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unknown thread type `{0}` (expected main, worker, helper or promise-task)")]
    UnknownThreadType(String),

    #[error("unknown injection mode `{0}` (expected one-shot or rearm)")]
    UnknownMode(String),

    #[error("invalid allocation index `{0}`")]
    InvalidIndex(String),

    #[error("allocation indices start at 1")]
    ZeroIndex,

    #[error("allocation index {index} does not follow {previous}")]
    NotIncreasing { previous: u64, index: u64 },

    #[error("injection plan has no points")]
    EmptyPlan,

    #[error("cannot inject into {0} threads without single-threaded replay")]
    ConcurrentThread(ThreadType),

    #[error("`{0}` requires oom-at or allow-oom")]
    OrphanedDirective(&'static str),

    #[error("oom-rearm and oom-oneshot are mutually exclusive")]
    ConflictingModes,

    #[error("invalid gc-zeal `{value}`: {reason}")]
    InvalidGcZeal { value: String, reason: String },

    #[error("malformed injection point `{0}`")]
    MalformedPoint(String),
}

/// Thread type an allocation counter is kept for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadType {
    Main,
    Worker,
    Helper,
    PromiseTask,
}

impl ThreadType {
    /// Directive spelling
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadType::Main => "main",
            ThreadType::Worker => "worker",
            ThreadType::Helper => "helper",
            ThreadType::PromiseTask => "promise-task",
        }
    }

    /// Whether allocations on this thread type race with the main thread
    pub fn is_concurrent(self) -> bool {
        matches!(self, ThreadType::Worker | ThreadType::Helper)
    }
}

impl fmt::Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadType {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(ThreadType::Main),
            "worker" => Ok(ThreadType::Worker),
            "helper" => Ok(ThreadType::Helper),
            "promise-task" => Ok(ThreadType::PromiseTask),
            other => Err(PlanError::UnknownThreadType(other.to_string())),
        }
    }
}

/// Whether an injection point fires once or every N allocations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionMode {
    /// Fire the first time the counter reaches the index, then disarm
    #[default]
    OneShot,
    /// Fire every time the counter reaches the index; the counter restarts
    Rearm,
}

impl InjectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InjectionMode::OneShot => "one-shot",
            InjectionMode::Rearm => "rearm",
        }
    }
}

impl fmt::Display for InjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InjectionMode {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one-shot" => Ok(InjectionMode::OneShot),
            "rearm" => Ok(InjectionMode::Rearm),
            other => Err(PlanError::UnknownMode(other.to_string())),
        }
    }
}

/// A single allocation to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionPoint {
    /// 1-based ordinal of the allocation on `thread`
    pub allocation_index: u64,
    pub thread: ThreadType,
    pub mode: InjectionMode,
}

impl InjectionPoint {
    pub fn new(allocation_index: u64, thread: ThreadType, mode: InjectionMode) -> Self {
        Self {
            allocation_index,
            thread,
            mode,
        }
    }
}

impl fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.allocation_index, self.thread, self.mode)
    }
}

impl FromStr for InjectionPoint {
    type Err = PlanError;

    /// Parse `index:thread:mode`, e.g. `11:main:one-shot`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        let (Some(index), Some(thread), Some(mode)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(PlanError::MalformedPoint(s.to_string()));
        };
        Ok(Self {
            allocation_index: parse_index(index)?,
            thread: thread.parse()?,
            mode: mode.parse()?,
        })
    }
}

fn parse_index(s: &str) -> Result<u64, PlanError> {
    match s.trim().parse::<u64>() {
        Ok(0) => Err(PlanError::ZeroIndex),
        Ok(index) => Ok(index),
        Err(_) => Err(PlanError::InvalidIndex(s.trim().to_string())),
    }
}

/// Ordered, validated sequence of injection points for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjectionPlan {
    points: Vec<InjectionPoint>,
}

impl FaultInjectionPlan {
    /// Validate and build a plan.
    ///
    /// Points must be non-empty with strictly increasing indices per thread
    /// type. Concurrent thread types are only accepted when the runtime can
    /// replay the run on a single thread.
    pub fn new(
        points: Vec<InjectionPoint>,
        single_threaded_replay: bool,
    ) -> Result<Self, PlanError> {
        let plan = Self::ordered(points)?;
        if !single_threaded_replay {
            if let Some(point) = plan.points.iter().find(|p| p.thread.is_concurrent()) {
                return Err(PlanError::ConcurrentThread(point.thread));
            }
        }
        Ok(plan)
    }

    fn ordered(points: Vec<InjectionPoint>) -> Result<Self, PlanError> {
        if points.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        let mut last: BTreeMap<ThreadType, u64> = BTreeMap::new();
        for point in &points {
            if point.allocation_index == 0 {
                return Err(PlanError::ZeroIndex);
            }
            if let Some(&previous) = last.get(&point.thread) {
                if point.allocation_index <= previous {
                    return Err(PlanError::NotIncreasing {
                        previous,
                        index: point.allocation_index,
                    });
                }
            }
            last.insert(point.thread, point.allocation_index);
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[InjectionPoint] {
        &self.points
    }

    /// Whether the run must be forced onto a single thread
    pub fn requires_single_threaded(&self) -> bool {
        self.points.iter().any(|p| p.thread.is_concurrent())
    }

    /// Encode for the worker environment.
    pub fn to_env_value(&self) -> String {
        self.points
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decode a worker environment value.
    ///
    /// Ordering is checked; the concurrency check belongs to the planner.
    pub fn parse_env_value(value: &str) -> Result<Self, PlanError> {
        let points = value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<InjectionPoint>, _>>()?;
        Self::ordered(points)
    }
}

/// An injection the worker performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Injection {
    pub thread: ThreadType,
    /// Counter value at which the allocation failed
    pub index: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PointState {
    fired: bool,
    last_fire: u64,
}

/// Per-run allocation bookkeeping.
///
/// Created for exactly one worker invocation and moved into it. The
/// subject runtime drives [`allocate`](Self::allocate); the harness feeds
/// the worker's reports through [`record_allocations`](Self::record_allocations)
/// and [`record_injection`](Self::record_injection).
#[derive(Debug, Default)]
pub struct AllocationCounter {
    plan: Option<FaultInjectionPlan>,
    states: Vec<PointState>,
    counts: BTreeMap<ThreadType, u64>,
    injections: Vec<Injection>,
}

impl AllocationCounter {
    pub fn new(plan: Option<FaultInjectionPlan>) -> Self {
        let states = plan
            .as_ref()
            .map(|p| vec![PointState::default(); p.points.len()])
            .unwrap_or_default();
        Self {
            plan,
            states,
            counts: BTreeMap::new(),
            injections: Vec::new(),
        }
    }

    pub fn plan(&self) -> Option<&FaultInjectionPlan> {
        self.plan.as_ref()
    }

    /// Count one allocation on `thread`; returns true if it must fail.
    pub fn allocate(&mut self, thread: ThreadType) -> bool {
        let count = self.counts.entry(thread).or_insert(0);
        *count += 1;
        let n = *count;

        let Some(plan) = &self.plan else {
            return false;
        };
        for (point, state) in plan.points.iter().zip(self.states.iter_mut()) {
            if point.thread != thread {
                continue;
            }
            let fires = match point.mode {
                InjectionMode::OneShot => !state.fired && n == point.allocation_index,
                InjectionMode::Rearm => n - state.last_fire == point.allocation_index,
            };
            if fires {
                state.fired = true;
                state.last_fire = n;
                self.injections.push(Injection { thread, index: n });
                return true;
            }
        }
        false
    }

    /// Take the worker's final allocation count for `thread`.
    pub fn record_allocations(&mut self, thread: ThreadType, count: u64) {
        self.counts.insert(thread, count);
    }

    /// Take an injection reported by the worker.
    pub fn record_injection(&mut self, thread: ThreadType, index: u64) {
        self.injections.push(Injection { thread, index });
    }

    pub fn count(&self, thread: ThreadType) -> u64 {
        self.counts.get(&thread).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<ThreadType, u64> {
        &self.counts
    }

    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    /// Whether any injection fired during the run
    pub fn fired(&self) -> bool {
        !self.injections.is_empty()
    }
}

/// GC-stress setting for one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcZeal {
    pub mode: u8,
    pub frequency: u32,
}

impl GcZeal {
    /// Parse `mode[,frequency]`.
    pub fn parse(value: &str) -> Result<Self, PlanError> {
        let invalid = |reason: &str| PlanError::InvalidGcZeal {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let (mode, frequency) = match value.split_once(',') {
            Some((mode, frequency)) => (mode.trim(), Some(frequency.trim())),
            None => (value.trim(), None),
        };
        let mode: u8 = mode.parse().map_err(|_| invalid("mode must be an integer"))?;
        if mode > MAX_ZEAL_MODE {
            return Err(invalid("mode out of range"));
        }
        let frequency = match frequency {
            Some(f) => match f.parse::<u32>() {
                Ok(0) | Err(_) => return Err(invalid("frequency must be a positive integer")),
                Ok(f) => f,
            },
            None => DEFAULT_ZEAL_FREQUENCY,
        };
        Ok(Self { mode, frequency })
    }

    pub fn to_env_value(&self) -> String {
        format!("{},{}", self.mode, self.frequency)
    }
}

impl fmt::Display for GcZeal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_env_value())
    }
}

/// An iterative allocation-failure sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPlan {
    pub thread: ThreadType,
    pub mode: InjectionMode,
    /// Highest index tried
    pub bound: u64,
}

impl SweepPlan {
    pub fn cursor(&self) -> SweepCursor {
        SweepCursor {
            plan: *self,
            next: 1,
            stop: None,
        }
    }
}

/// One step of a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepStep {
    pub index: u64,
    pub plan: FaultInjectionPlan,
}

/// Why a sweep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SweepStop {
    /// The run at `index` did not fire: the test allocates fewer times
    Exhausted { index: u64 },
    /// The safety bound was reached
    BoundReached { bound: u64 },
    /// The run at `index` timed out or was cancelled
    Interrupted { index: u64 },
}

/// Iterator-like driver for a sweep
#[derive(Debug, Clone)]
pub struct SweepCursor {
    plan: SweepPlan,
    next: u64,
    stop: Option<SweepStop>,
}

impl SweepCursor {
    /// Next step, or `None` once the sweep has stopped.
    pub fn step(&mut self) -> Option<SweepStep> {
        if self.stop.is_some() {
            return None;
        }
        if self.next > self.plan.bound {
            self.stop = Some(SweepStop::BoundReached {
                bound: self.plan.bound,
            });
            return None;
        }
        let index = self.next;
        self.next += 1;
        let point = InjectionPoint::new(index, self.plan.thread, self.plan.mode);
        Some(SweepStep {
            index,
            plan: FaultInjectionPlan {
                points: vec![point],
            },
        })
    }

    /// Report whether the injection at `index` fired.
    pub fn record(&mut self, index: u64, fired: bool) {
        if !fired && self.stop.is_none() {
            self.stop = Some(SweepStop::Exhausted { index });
        }
    }

    /// Stop after a run that timed out or was cancelled.
    pub fn halt(&mut self, index: u64) {
        if self.stop.is_none() {
            self.stop = Some(SweepStop::Interrupted { index });
        }
    }

    pub fn stop_reason(&self) -> Option<SweepStop> {
        self.stop
    }
}

/// How a test's allocations are failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStrategy {
    /// Run once without injection
    None,
    /// Run once with a fixed plan
    Explicit(FaultInjectionPlan),
    /// Run once per index
    Sweep(SweepPlan),
}

/// Planner output for one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultSchedule {
    pub strategy: PlanStrategy,
    pub gc_zeal: Option<GcZeal>,
}

impl FaultSchedule {
    /// Whether the worker must be forced onto a single thread
    pub fn requires_single_threaded(&self) -> bool {
        match &self.strategy {
            PlanStrategy::None => false,
            PlanStrategy::Explicit(plan) => plan.requires_single_threaded(),
            PlanStrategy::Sweep(sweep) => sweep.thread.is_concurrent(),
        }
    }
}

/// Builds [`FaultSchedule`]s from directives
#[derive(Debug, Clone, Copy)]
pub struct FaultPlanner {
    default_mode: InjectionMode,
    sweep_bound: u64,
    single_threaded_replay: bool,
}

impl Default for FaultPlanner {
    fn default() -> Self {
        Self::new(InjectionMode::OneShot, DEFAULT_SWEEP_BOUND, false)
    }
}

impl FaultPlanner {
    pub fn new(default_mode: InjectionMode, sweep_bound: u64, single_threaded_replay: bool) -> Self {
        Self {
            default_mode,
            sweep_bound: sweep_bound.max(1),
            single_threaded_replay,
        }
    }

    pub fn sweep_bound(&self) -> u64 {
        self.sweep_bound
    }

    /// Plan fault injection for a test.
    pub fn plan(&self, directives: &DirectiveSet) -> Result<FaultSchedule, PlanError> {
        let gc_zeal = directives
            .option(OptionKey::GcZeal)
            .map(GcZeal::parse)
            .transpose()?;
        Ok(FaultSchedule {
            strategy: self.strategy(directives)?,
            gc_zeal,
        })
    }

    fn strategy(&self, directives: &DirectiveSet) -> Result<PlanStrategy, PlanError> {
        let rearm = directives.has_flag(Flag::OomRearm);
        let oneshot = directives.has_flag(Flag::OomOneShot);
        let mode = match (rearm, oneshot) {
            (true, true) => return Err(PlanError::ConflictingModes),
            (true, false) => InjectionMode::Rearm,
            (false, true) => InjectionMode::OneShot,
            (false, false) => self.default_mode,
        };
        let thread_option = directives.option(OptionKey::OomThread);
        let oom_at = directives.option(OptionKey::OomAt);
        let allow_oom = directives.has_flag(Flag::AllowOom);

        if oom_at.is_none() && !allow_oom {
            if thread_option.is_some() {
                return Err(PlanError::OrphanedDirective(OptionKey::OomThread.as_str()));
            }
            if rearm {
                return Err(PlanError::OrphanedDirective(Flag::OomRearm.as_str()));
            }
            if oneshot {
                return Err(PlanError::OrphanedDirective(Flag::OomOneShot.as_str()));
            }
            return Ok(PlanStrategy::None);
        }

        let thread = thread_option
            .map(str::parse::<ThreadType>)
            .transpose()?
            .unwrap_or(ThreadType::Main);
        if thread.is_concurrent() && !self.single_threaded_replay {
            return Err(PlanError::ConcurrentThread(thread));
        }

        match oom_at {
            Some(list) => {
                let points = list
                    .split(',')
                    .map(|s| parse_index(s).map(|i| InjectionPoint::new(i, thread, mode)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PlanStrategy::Explicit(FaultInjectionPlan::new(
                    points,
                    self.single_threaded_replay,
                )?))
            }
            None => Ok(PlanStrategy::Sweep(SweepPlan {
                thread,
                mode,
                bound: self.sweep_bound,
            })),
        }
    }
}
