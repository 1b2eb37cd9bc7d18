//! Wire protocol between the harness and the subject runtime.
//!
//! Control flows to the worker through environment variables. Results flow
//! back as structured records on stderr, one JSON object per line behind
//! [`RECORD_PREFIX`]. Every other stderr line is ordinary diagnostic text.

use crate::fault::ThreadType;
use crate::realm::TraceEvent;
use core_types::ThrownError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of a structured record line
pub const RECORD_PREFIX: &str = "##jit-harness ";

/// Injection plan, `index:thread:mode[,...]`
pub const ENV_OOM: &str = "JIT_HARNESS_OOM";

/// Set to `1` when the run is forced onto a single thread
pub const ENV_SINGLE_THREADED: &str = "JIT_HARNESS_SINGLE_THREADED";

/// GC zeal for the main realm, `mode,frequency`
pub const ENV_GC_ZEAL: &str = "JIT_HARNESS_GC_ZEAL";

/// JSON array of realm specs
pub const ENV_REALMS: &str = "JIT_HARNESS_REALMS";

/// Argument that asks the runtime for its capability report
pub const CAPABILITIES_FLAG: &str = "--harness-capabilities";

/// Exit status of a run that ended with an uncaught exception
pub const UNCAUGHT_EXCEPTION_STATUS: i32 = 3;

/// A malformed record line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed worker record `{line}`: {reason}")]
pub struct ProtocolError {
    pub line: String,
    pub reason: String,
}

/// Structured report from the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkerRecord {
    /// Final allocation count for a thread type
    Allocations { thread: ThreadType, count: u64 },
    /// An allocation was failed on purpose
    OomInjected { thread: ThreadType, index: u64 },
    /// The error that escaped the script
    Thrown(ThrownError),
    /// Event in an observed realm
    Trace { realm: u32, event: TraceEvent },
}

impl WorkerRecord {
    /// Render as a stderr line (without newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}{}", RECORD_PREFIX, serde_json::to_string(self)?))
    }

    /// Parse a stderr line; `None` if it is not a record line.
    pub fn parse_line(line: &str) -> Option<Result<Self, ProtocolError>> {
        let body = line.trim_end().strip_prefix(RECORD_PREFIX)?;
        Some(serde_json::from_str(body).map_err(|e| ProtocolError {
            line: line.trim_end().to_string(),
            reason: e.to_string(),
        }))
    }
}

/// Worker stderr split into records and plain text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerOutput {
    pub records: Vec<WorkerRecord>,
    pub anomalies: Vec<ProtocolError>,
    /// Non-record lines, newline-joined
    pub text: String,
}

impl WorkerOutput {
    pub fn thrown(&self) -> Option<&ThrownError> {
        self.records.iter().rev().find_map(|r| match r {
            WorkerRecord::Thrown(error) => Some(error),
            _ => None,
        })
    }
}

/// Split raw stderr.
pub fn parse_stderr(stderr: &str) -> WorkerOutput {
    let mut output = WorkerOutput::default();
    let mut text = Vec::new();
    for line in stderr.lines() {
        match WorkerRecord::parse_line(line) {
            Some(Ok(record)) => output.records.push(record),
            Some(Err(err)) => output.anomalies.push(err),
            None => text.push(line),
        }
    }
    output.text = text.join("\n");
    output
}
