//! Capability environment.
//!
//! The subject runtime reports what it supports once, at harness startup.
//! That report becomes a read-only [`CapabilityEnvironment`] which is shared
//! by every `skip-if` evaluation in the batch.

use crate::condition::ConditionError;
use crate::error::{HarnessError, HarnessResult};
use core_types::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a capability predicate
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    /// Wrong number of arguments
    #[error("expected {expected} argument(s), got {found}")]
    Arity { expected: usize, found: usize },

    /// Argument of the wrong type
    #[error("argument {index} must be a {expected}, got {found}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

/// Predicate signature
pub type CapabilityFn = Arc<dyn Fn(&[Value]) -> Result<Value, CapabilityError> + Send + Sync>;

/// A named entry of the environment
#[derive(Clone)]
pub enum Capability {
    /// Zero-arity lookup
    Value(Value),
    /// Predicate called with literal arguments
    Function(CapabilityFn),
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Capability::Function(_) => write!(f, "Function(...)"),
        }
    }
}

/// What the subject runtime says about itself
///
/// Read from YAML or JSON; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityReport {
    /// Number of helper (background) threads
    pub helper_thread_count: u32,
    /// Named optional features (e.g. "wasm", "SharedArrayBuffer")
    pub features: BTreeSet<String>,
    /// Build configuration flags
    pub build: BTreeMap<String, Value>,
    /// Names defined on the runtime's global object
    pub globals: BTreeSet<String>,
    /// Whether the runtime can replay a run on a single thread
    pub single_threaded_replay: bool,
    /// Additional zero-arity capabilities
    pub extra: BTreeMap<String, Value>,
}

impl CapabilityReport {
    /// Parse a report from YAML (JSON is accepted as well).
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Read a report from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::from_yaml(&text).map_err(|source| HarnessError::InvalidCapabilities {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Read-only map from capability names to values and predicates
#[derive(Debug, Clone)]
pub struct CapabilityEnvironment {
    entries: HashMap<String, Capability>,
    globals: Value,
    single_threaded_replay: bool,
}

impl Default for CapabilityEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            globals: Value::Keys(BTreeSet::new()),
            single_threaded_replay: false,
        }
    }

    /// Build the environment exposing the fixed set of named queries:
    /// `helperThreadCount()`, `isFeatureSupported(name)`,
    /// `getBuildConfiguration(name)`, `this`, plus the report's extras.
    pub fn from_report(report: &CapabilityReport) -> Self {
        let mut env = Self::new()
            .with_globals(report.globals.iter().cloned())
            .with_single_threaded_replay(report.single_threaded_replay);

        let helper_threads = report.helper_thread_count;
        env = env.with_function("helperThreadCount", move |args| {
            expect_arity(args, 0)?;
            Ok(Value::from(helper_threads))
        });

        let features = report.features.clone();
        env = env.with_function("isFeatureSupported", move |args| {
            let name = string_arg(args)?;
            Ok(Value::Boolean(features.contains(name)))
        });

        let build = report.build.clone();
        env = env.with_function("getBuildConfiguration", move |args| {
            let name = string_arg(args)?;
            Ok(build.get(name).cloned().unwrap_or(Value::Undefined))
        });

        for (name, value) in &report.extra {
            env = env.with_value(name.clone(), value.clone());
        }
        env
    }

    /// Add a zero-arity capability
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(name.into(), Capability::Value(value.into()));
        self
    }

    /// Add a predicate
    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Capability::Function(Arc::new(f)));
        self
    }

    /// Set the names visible through `this`
    pub fn with_globals<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.globals = Value::keys(names);
        self
    }

    /// Declare whether runs can be forced onto a single thread
    pub fn with_single_threaded_replay(mut self, supported: bool) -> Self {
        self.single_threaded_replay = supported;
        self
    }

    /// Container of global names (`this`)
    pub fn globals(&self) -> &Value {
        &self.globals
    }

    /// Whether the runtime guarantees single-threaded replay
    pub fn single_threaded_replay(&self) -> bool {
        self.single_threaded_replay
    }

    /// Whether `name` is defined
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve an identifier.
    pub fn value(&self, name: &str) -> Result<Value, ConditionError> {
        match self.entries.get(name) {
            Some(Capability::Value(v)) => Ok(v.clone()),
            Some(Capability::Function(_)) => Err(ConditionError::NotAValue(name.to_string())),
            None => Err(ConditionError::UnknownCapability(name.to_string())),
        }
    }

    /// Call a predicate.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ConditionError> {
        match self.entries.get(name) {
            Some(Capability::Function(f)) => {
                (f.as_ref())(args).map_err(|source| ConditionError::Capability {
                    name: name.to_string(),
                    source,
                })
            }
            Some(Capability::Value(_)) => Err(ConditionError::NotCallable(name.to_string())),
            None => Err(ConditionError::UnknownCapability(name.to_string())),
        }
    }
}

fn expect_arity(args: &[Value], expected: usize) -> Result<(), CapabilityError> {
    if args.len() != expected {
        return Err(CapabilityError::Arity {
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

fn string_arg(args: &[Value]) -> Result<&str, CapabilityError> {
    expect_arity(args, 1)?;
    args[0].as_str().ok_or(CapabilityError::ArgumentType {
        index: 0,
        expected: "string",
        found: args[0].type_of(),
    })
}
