//! Result classification.
//!
//! Maps what a worker process did onto the fixed taxonomy, given what the
//! test declared it expects.

use crate::directive::{regex_literal, DirectiveSet, Flag, OptionKey};
use crate::fault::{Injection, SweepStop};
use crate::protocol::WorkerOutput;
use crate::realm::Trace;
use crate::worker::{ExitInfo, RawOutcome};
use core_types::{ErrorKind, ThrownError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lines of stderr kept in a diagnostic
const STDERR_EXCERPT_LINES: usize = 20;

/// Final category of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Pass,
    Fail,
    Crash,
    Timeout,
    Skip,
    ConfigurationError,
    Cancelled,
}

impl Classification {
    pub const ALL: [Classification; 7] = [
        Classification::Pass,
        Classification::Fail,
        Classification::Crash,
        Classification::Timeout,
        Classification::Skip,
        Classification::ConfigurationError,
        Classification::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Pass => "PASS",
            Classification::Fail => "FAIL",
            Classification::Crash => "CRASH",
            Classification::Timeout => "TIMEOUT",
            Classification::Skip => "SKIP",
            Classification::ConfigurationError => "CONFIGURATION-ERROR",
            Classification::Cancelled => "CANCELLED",
        }
    }

    /// Ranking used to fold sweep points: Crash > Timeout > Fail > Pass
    pub fn severity(self) -> u8 {
        match self {
            Classification::Pass | Classification::Skip => 0,
            Classification::Fail => 1,
            Classification::Timeout => 2,
            Classification::Crash => 3,
            Classification::ConfigurationError | Classification::Cancelled => 4,
        }
    }

    /// Whether this result fails the batch
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Classification::Fail
                | Classification::Crash
                | Classification::Timeout
                | Classification::Cancelled
        )
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected error message
#[derive(Debug, Clone)]
pub enum MessagePattern {
    /// `/regex/`
    Regex(Regex),
    /// Plain substring
    Substring(String),
}

impl MessagePattern {
    pub fn parse(value: &str) -> Result<Self, regex::Error> {
        match regex_literal(value) {
            Some(pattern) => Ok(MessagePattern::Regex(Regex::new(pattern)?)),
            None => Ok(MessagePattern::Substring(value.to_string())),
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        match self {
            MessagePattern::Regex(re) => re.is_match(message),
            MessagePattern::Substring(s) => message.contains(s.as_str()),
        }
    }
}

impl PartialEq for MessagePattern {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl fmt::Display for MessagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagePattern::Regex(re) => write!(f, "/{}/", re.as_str()),
            MessagePattern::Substring(s) => f.write_str(s),
        }
    }
}

/// What a test declared about its own outcome
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expectation {
    pub error: Option<ErrorKind>,
    pub message: Option<MessagePattern>,
    pub exit_status: Option<i32>,
    pub crash: bool,
    pub allow_oom: bool,
    pub allow_overrecursed: bool,
}

impl Expectation {
    pub fn from_directives(directives: &DirectiveSet) -> Result<Self, String> {
        let message = directives
            .option(OptionKey::ErrorMessage)
            .map(MessagePattern::parse)
            .transpose()
            .map_err(|e| e.to_string())?;
        let exit_status = directives
            .option(OptionKey::ExitStatus)
            .map(|s| s.parse::<i32>().map_err(|e| format!("exitstatus: {}", e)))
            .transpose()?;
        Ok(Self {
            error: directives
                .option(OptionKey::Error)
                .map(|s| ErrorKind::from(s.to_string())),
            message,
            exit_status,
            crash: directives.has_flag(Flag::Crash),
            allow_oom: directives.has_flag(Flag::AllowOom),
            allow_overrecursed: directives.has_flag(Flag::AllowOverrecursed),
        })
    }

    fn expects_error(&self) -> bool {
        self.error.is_some() || self.message.is_some()
    }

    fn describe_error(&self) -> String {
        match (&self.error, &self.message) {
            (Some(kind), Some(message)) => format!("{}: {}", kind, message),
            (Some(kind), None) => kind.to_string(),
            (None, Some(message)) => format!("error matching {}", message),
            (None, None) => "no error".to_string(),
        }
    }
}

/// Explanation attached to every non-PASS result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl Diagnostic {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    fn with_run(mut self, raw: &RawOutcome, output: &WorkerOutput) -> Self {
        self.elapsed_ms = Some(raw.elapsed.as_millis() as u64);
        let lines: Vec<&str> = output.text.lines().collect();
        if !lines.is_empty() {
            let start = lines.len().saturating_sub(STDERR_EXCERPT_LINES);
            self.stderr_excerpt = Some(lines[start..].join("\n"));
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {}", expected)?;
            match &self.actual {
                Some(actual) => write!(f, ", got {})", actual)?,
                None => f.write_str(")")?,
            }
        }
        Ok(())
    }
}

/// Classifier output for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub classification: Classification,
    pub matched_expectation: bool,
    pub diagnostic: Option<Diagnostic>,
}

impl Verdict {
    fn pass(matched_expectation: bool) -> Self {
        Self {
            classification: Classification::Pass,
            matched_expectation,
            diagnostic: None,
        }
    }

    fn non_pass(classification: Classification, diagnostic: Diagnostic) -> Self {
        Self {
            classification,
            matched_expectation: false,
            diagnostic: Some(diagnostic),
        }
    }
}

/// The error that escaped the script.
///
/// The worker's `thrown` record wins. Without one, the last stderr line shaped
/// like `[uncaught exception: ]Kind: message` is used, but only when the run
/// exited non-zero: a clean exit means any such line was logged, not thrown.
pub fn detect_thrown(exit: ExitInfo, output: &WorkerOutput) -> Option<ThrownError> {
    if let Some(error) = output.thrown() {
        return Some(error.clone());
    }
    if exit.code() == Some(0) {
        return None;
    }
    output.text.lines().rev().find_map(ThrownError::parse_line)
}

/// Classify one worker run.
pub fn classify(raw: &RawOutcome, output: &WorkerOutput, expectation: &Expectation) -> Verdict {
    let verdict = classify_run(raw, output, expectation);
    match verdict.diagnostic {
        Some(diagnostic) => Verdict {
            diagnostic: Some(diagnostic.with_run(raw, output)),
            ..verdict
        },
        None => verdict,
    }
}

fn classify_run(raw: &RawOutcome, output: &WorkerOutput, expectation: &Expectation) -> Verdict {
    if raw.timed_out {
        return Verdict::non_pass(
            Classification::Timeout,
            Diagnostic::new(format!("timed out after {}", format_duration(raw.elapsed))),
        );
    }
    if raw.cancelled {
        return Verdict::non_pass(
            Classification::Cancelled,
            Diagnostic::new("cancelled while running"),
        );
    }

    if let ExitInfo::Signal(signal) = raw.exit {
        if expectation.crash {
            return Verdict::pass(true);
        }
        return Verdict::non_pass(
            Classification::Crash,
            Diagnostic::new(format!("terminated by signal {}", signal)),
        );
    }
    let code = raw.exit.code().unwrap_or(-1);

    if expectation.crash {
        return Verdict::non_pass(
            Classification::Fail,
            Diagnostic::new("expected abnormal termination")
                .expected("crash")
                .actual(raw.exit.to_string()),
        );
    }

    let thrown = detect_thrown(raw.exit, output);

    if expectation.expects_error() {
        let Some(thrown) = thrown else {
            return Verdict::non_pass(
                Classification::Fail,
                Diagnostic::new("expected error was not thrown")
                    .expected(expectation.describe_error())
                    .actual(raw.exit.to_string()),
            );
        };
        if let Some(kind) = &expectation.error {
            if *kind != thrown.kind {
                return Verdict::non_pass(
                    Classification::Fail,
                    Diagnostic::new("error kind mismatch")
                        .expected(kind.to_string())
                        .actual(thrown.to_string()),
                );
            }
        }
        if let Some(pattern) = &expectation.message {
            if !pattern.matches(&thrown.message) {
                return Verdict::non_pass(
                    Classification::Fail,
                    Diagnostic::new("error message mismatch")
                        .expected(pattern.to_string())
                        .actual(thrown.message.clone()),
                );
            }
        }
        return match expectation.exit_status {
            Some(status) if status != code => exit_status_mismatch(status, raw.exit),
            _ => Verdict::pass(true),
        };
    }

    if let Some(status) = expectation.exit_status {
        return if status == code {
            Verdict::pass(true)
        } else {
            exit_status_mismatch(status, raw.exit)
        };
    }

    if let Some(thrown) = thrown {
        if (thrown.is_out_of_memory() && expectation.allow_oom)
            || (thrown.is_overrecursed() && expectation.allow_overrecursed)
        {
            return Verdict::pass(true);
        }
        return Verdict::non_pass(
            Classification::Fail,
            Diagnostic::new("uncaught exception")
                .expected("no error")
                .actual(thrown.to_string()),
        );
    }

    if code == 0 {
        Verdict::pass(false)
    } else {
        Verdict::non_pass(
            Classification::Crash,
            Diagnostic::new(format!("unexpected exit code {}", code)),
        )
    }
}

fn exit_status_mismatch(expected: i32, actual: ExitInfo) -> Verdict {
    Verdict::non_pass(
        Classification::Fail,
        Diagnostic::new("exit status mismatch")
            .expected(expected.to_string())
            .actual(actual.to_string()),
    )
}

fn format_duration(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}

/// The most severe of several classifications.
pub fn most_severe<I>(classifications: I) -> Classification
where
    I: IntoIterator<Item = Classification>,
{
    classifications
        .into_iter()
        .max_by_key(|c| c.severity())
        .unwrap_or(Classification::Pass)
}

/// One run of a fuzz sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub index: u64,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

/// Trace collected from an observed realm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmTrace {
    pub realm: u32,
    pub trace: Trace,
}

/// Result of one test, produced exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub test: String,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub elapsed_ms: u64,
    pub matched_expectation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sweep: Vec<SweepPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_stop: Option<SweepStop>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub injections: Vec<Injection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<RealmTrace>,
}

impl ExecutionOutcome {
    fn without_run(
        test: impl Into<String>,
        classification: Classification,
        diagnostic: Diagnostic,
    ) -> Self {
        Self {
            test: test.into(),
            classification,
            exit: None,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms: 0,
            matched_expectation: false,
            diagnostic: Some(diagnostic),
            sweep: Vec::new(),
            sweep_stop: None,
            injections: Vec::new(),
            traces: Vec::new(),
        }
    }

    pub fn skipped(test: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::without_run(test, Classification::Skip, Diagnostic::new(reason))
    }

    pub fn configuration_error(test: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::without_run(
            test,
            Classification::ConfigurationError,
            Diagnostic::new(reason),
        )
    }

    pub fn cancelled(test: impl Into<String>) -> Self {
        Self::without_run(
            test,
            Classification::Cancelled,
            Diagnostic::new("cancelled before start"),
        )
    }

    /// Outcome of a single run.
    pub fn from_run(test: impl Into<String>, raw: RawOutcome, verdict: Verdict) -> Self {
        Self {
            test: test.into(),
            classification: verdict.classification,
            exit: Some(raw.exit),
            stdout: raw.stdout,
            stderr: raw.stderr,
            elapsed_ms: raw.elapsed.as_millis() as u64,
            matched_expectation: verdict.matched_expectation,
            diagnostic: verdict.diagnostic,
            sweep: Vec::new(),
            sweep_stop: None,
            injections: Vec::new(),
            traces: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// One-line reason for reports
    pub fn reason(&self) -> String {
        self.diagnostic
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}
