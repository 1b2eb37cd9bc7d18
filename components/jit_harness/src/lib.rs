//! Directive-driven, fault-injecting conformance harness.
//!
//! Test scripts carry a `// |jit-test| ...` pragma line that controls how the
//! harness runs them: flags, expected errors, runtime flags, a `skip-if`
//! condition evaluated against the runtime's reported capabilities, and
//! out-of-memory injection at chosen allocation indices or as a sweep.
//! Every run is an isolated process of the subject runtime; results are
//! classified into a fixed taxonomy and aggregated into a sorted report.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod capability;
pub mod classify;
pub mod cli;
pub mod condition;
pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod fault;
pub mod filter;
pub mod harness;
pub mod protocol;
pub mod realm;
pub mod report;
pub mod scheduler;
pub mod test_case;
pub mod worker;

pub use cancel::CancellationToken;
pub use capability::{CapabilityEnvironment, CapabilityReport};
pub use classify::{Classification, Diagnostic, ExecutionOutcome};
pub use cli::{Cli, ReportFormat};
pub use condition::{Condition, ConditionError};
pub use config::HarnessConfig;
pub use directive::{Directive, DirectiveError, DirectiveSet, Flag, OptionKey, PRAGMA_MARKER};
pub use engine::EngineConfig;
pub use error::{HarnessError, HarnessResult};
pub use fault::{FaultInjectionPlan, FaultPlanner, InjectionMode, InjectionPoint, ThreadType};
pub use harness::Harness;
pub use realm::{RealmArena, RealmHandle, Trace, TraceEvent};
pub use report::BatchReport;
pub use test_case::TestCase;
