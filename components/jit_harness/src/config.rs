//! Harness configuration.
//!
//! Read from YAML; every field has a default, and command-line flags are
//! applied on top.

use crate::error::{HarnessError, HarnessResult};
use crate::fault::{InjectionMode, DEFAULT_SWEEP_BOUND};
use crate::test_case::TestCase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Subject runtime executable
    pub engine: Option<PathBuf>,
    /// Arguments for every invocation of the runtime
    pub engine_args: Vec<String>,
    /// Environment for every invocation of the runtime
    pub engine_env: BTreeMap<String, String>,
    /// Capability report file; queried from the runtime when unset
    pub capabilities: Option<PathBuf>,
    /// Concurrent worker processes
    pub jobs: usize,
    /// Default per-run timeout
    pub timeout_ms: u64,
    /// Timeout multiplier for `slow` and `heavy` tests
    pub slow_multiplier: u32,
    /// Concurrent `heavy` tests
    pub heavy_jobs: usize,
    /// Highest allocation index tried by a fuzz sweep
    pub sweep_bound: u64,
    /// Mode for tests that declare neither `oom-rearm` nor `oom-oneshot`
    pub injection_mode: InjectionMode,
    /// File extensions treated as tests
    pub extensions: Vec<String>,
    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,
    /// Only tests carrying one of these tags or flags
    pub tags: Vec<String>,
    /// Only tests whose identity matches one of these globs
    pub paths: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            engine: None,
            engine_args: Vec::new(),
            engine_env: BTreeMap::new(),
            capabilities: None,
            jobs: default_jobs(),
            timeout_ms: 10_000,
            slow_multiplier: 5,
            heavy_jobs: 1,
            sweep_bound: DEFAULT_SWEEP_BOUND,
            injection_mode: InjectionMode::OneShot,
            extensions: vec!["js".to_string()],
            exclude_dirs: vec!["lib".to_string()],
            tags: Vec::new(),
            paths: Vec::new(),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl HarnessConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml(text: &str) -> HarnessResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Reject settings no batch can run with.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.jobs == 0 {
            return Err(HarnessError::Config("jobs must be at least 1".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(HarnessError::Config("timeout must be positive".to_string()));
        }
        if self.slow_multiplier == 0 {
            return Err(HarnessError::Config(
                "slow multiplier must be at least 1".to_string(),
            ));
        }
        if self.timeout().checked_mul(self.slow_multiplier).is_none() {
            return Err(HarnessError::Config(format!(
                "slow multiplier {} overflows a timeout of {} ms",
                self.slow_multiplier, self.timeout_ms
            )));
        }
        if self.heavy_jobs == 0 {
            return Err(HarnessError::Config(
                "heavy jobs must be at least 1".to_string(),
            ));
        }
        if self.sweep_bound == 0 {
            return Err(HarnessError::Config(
                "sweep bound must be at least 1".to_string(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(HarnessError::Config(
                "at least one test extension is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Default per-run timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Timeout for one run of `test`
    pub fn timeout_for(&self, test: &TestCase) -> Duration {
        if test.is_slow() || test.is_heavy() {
            self.timeout().saturating_mul(self.slow_multiplier)
        } else {
            self.timeout()
        }
    }

    /// Whether `name` has a test extension
    pub fn is_test_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }

    /// Whether a directory is skipped during discovery
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|d| d == name)
    }
}
