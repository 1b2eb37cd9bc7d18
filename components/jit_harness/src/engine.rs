//! Subject runtime adapter.
//!
//! Describes how to launch the runtime under test and how to ask it for its
//! capability report.

use crate::cancel::CancellationToken;
use crate::capability::CapabilityReport;
use crate::error::{HarnessError, HarnessResult};
use crate::fault::{FaultInjectionPlan, GcZeal};
use crate::protocol::{CAPABILITIES_FLAG, ENV_GC_ZEAL, ENV_OOM, ENV_REALMS, ENV_SINGLE_THREADED};
use crate::realm::RealmSpec;
use crate::worker::{run_isolated, ExitInfo};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// How to launch the subject runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub program: PathBuf,
    /// Arguments passed before anything else on every invocation
    pub args: Vec<String>,
    /// Extra environment for every invocation
    pub env: Vec<(String, String)>,
}

impl EngineConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    /// Build the command for one run.
    pub fn command(&self, invocation: &Invocation) -> HarnessResult<Command> {
        let mut command = self.base_command();
        command.args(&invocation.engine_args).arg(&invocation.script);
        if let Some(dir) = invocation.script.parent() {
            command.current_dir(dir);
        }
        command
            .env_remove(ENV_OOM)
            .env_remove(ENV_SINGLE_THREADED)
            .env_remove(ENV_GC_ZEAL)
            .env_remove(ENV_REALMS);

        if let Some(plan) = &invocation.plan {
            command.env(ENV_OOM, plan.to_env_value());
        }
        if invocation.single_threaded {
            command.env(ENV_SINGLE_THREADED, "1");
        }
        if let Some(zeal) = &invocation.gc_zeal {
            command.env(ENV_GC_ZEAL, zeal.to_env_value());
        }
        if !invocation.realms.is_empty() {
            command.env(ENV_REALMS, serde_json::to_string(&invocation.realms)?);
        }
        Ok(command)
    }

    /// Ask the runtime for its capability report.
    pub fn query_capabilities(&self, timeout: Duration) -> HarnessResult<CapabilityReport> {
        let mut command = self.base_command();
        command.arg(CAPABILITIES_FLAG);
        info!(program = %self.program.display(), "querying runtime capabilities");

        let outcome = run_isolated(command, timeout, &CancellationToken::new()).map_err(|e| {
            HarnessError::Capabilities(format!(
                "cannot launch {}: {}",
                self.program.display(),
                e
            ))
        })?;
        if outcome.exit != ExitInfo::Code(0) {
            return Err(HarnessError::Capabilities(format!(
                "{} {} ended with {}: {}",
                self.program.display(),
                CAPABILITIES_FLAG,
                outcome.exit,
                outcome.stderr.trim()
            )));
        }
        let report = CapabilityReport::from_yaml(&outcome.stdout)
            .map_err(|e| HarnessError::Capabilities(format!("invalid capability report: {}", e)))?;
        debug!(?report, "capability report");
        Ok(report)
    }
}

/// One run of one test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub script: PathBuf,
    /// Engine flags from the pragma line
    pub engine_args: Vec<String>,
    pub plan: Option<FaultInjectionPlan>,
    pub single_threaded: bool,
    pub gc_zeal: Option<GcZeal>,
    pub realms: Vec<RealmSpec>,
}

impl Invocation {
    pub fn new(script: &Path) -> Self {
        Self {
            script: script.to_path_buf(),
            ..Self::default()
        }
    }
}
