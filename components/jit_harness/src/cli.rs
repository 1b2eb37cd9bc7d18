//! Command-line interface definitions

use crate::config::HarnessConfig;
use crate::fault::InjectionMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON report keyed by test identity
    Json,
}

/// Directive-driven conformance harness
#[derive(Parser, Debug)]
#[command(name = "jit-harness")]
#[command(about = "Runs directive-annotated regression tests against a runtime", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Test file or directory of tests
    pub root: PathBuf,

    /// Subject runtime executable
    #[arg(short, long)]
    pub engine: Option<PathBuf>,

    /// Extra argument for every runtime invocation (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Number of concurrent worker processes
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Default per-run timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Timeout multiplier for slow and heavy tests
    #[arg(long)]
    pub slow_multiplier: Option<u32>,

    /// Number of heavy tests allowed to run at once
    #[arg(long)]
    pub heavy_jobs: Option<usize>,

    /// Only run tests carrying this tag or flag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Only run tests whose path matches this glob (repeatable)
    #[arg(long = "path")]
    pub paths: Vec<String>,

    /// Read the capability report from a file instead of the runtime
    #[arg(long)]
    pub capabilities: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Highest allocation index tried by a fuzz sweep
    #[arg(long)]
    pub sweep_bound: Option<u64>,

    /// Injection mode for tests that do not choose one
    #[arg(long, value_enum)]
    pub injection_mode: Option<InjectionMode>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Raise the log level (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Apply command-line overrides on top of `config`.
    pub fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(engine) = &self.engine {
            config.engine = Some(engine.clone());
        }
        config.engine_args.extend(self.engine_args.iter().cloned());
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(secs) = self.timeout {
            config.timeout_ms = (secs * 1000.0).round().max(0.0) as u64;
        }
        if let Some(multiplier) = self.slow_multiplier {
            config.slow_multiplier = multiplier;
        }
        if let Some(heavy) = self.heavy_jobs {
            config.heavy_jobs = heavy;
        }
        config.tags.extend(self.tags.iter().cloned());
        config.paths.extend(self.paths.iter().cloned());
        if let Some(capabilities) = &self.capabilities {
            config.capabilities = Some(capabilities.clone());
        }
        if let Some(bound) = self.sweep_bound {
            config.sweep_bound = bound;
        }
        if let Some(mode) = self.injection_mode {
            config.injection_mode = mode;
        }
        config
    }

    /// Log filter implied by `-v`
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
