//! Loaded test scripts with their parsed directives.

use crate::capability::CapabilityEnvironment;
use crate::directive::{DirectiveError, DirectiveSet, Flag};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Why a test could not be loaded
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed directive: {0}")]
    Directive(#[from] DirectiveError),
}

/// Result of evaluating a test's `skip-if` condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipVerdict {
    Run,
    Skip { reason: String },
}

impl SkipVerdict {
    pub fn is_skip(&self) -> bool {
        matches!(self, SkipVerdict::Skip { .. })
    }
}

/// Test script with source and parsed directives
#[derive(Debug)]
pub struct TestCase {
    /// Root-relative path with `/` separators
    id: String,
    path: PathBuf,
    source: String,
    directives: DirectiveSet,
    skip: OnceLock<SkipVerdict>,
}

impl TestCase {
    /// Load a test file from disk.
    pub fn load(root: &Path, path: &Path) -> Result<Self, LoadError> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_source(identity(root, path), path, source)?)
    }

    /// Build a test from source already in memory.
    pub fn from_source(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        source: impl Into<String>,
    ) -> Result<Self, DirectiveError> {
        let source = source.into();
        let directives = DirectiveSet::parse_source(&source)?;
        Ok(Self {
            id: id.into(),
            path: path.into(),
            source,
            directives,
            skip: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn directives(&self) -> &DirectiveSet {
        &self.directives
    }

    /// Get the test name (file name without extension)
    pub fn name(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.id)
    }

    pub fn is_slow(&self) -> bool {
        self.directives.has_flag(Flag::Slow)
    }

    pub fn is_heavy(&self) -> bool {
        self.directives.has_flag(Flag::Heavy)
    }

    pub fn tags(&self) -> Vec<&str> {
        self.directives.tags()
    }

    /// Evaluate the `skip-if` condition once; later calls return the cached
    /// verdict.
    pub fn skip_verdict(&self, env: &CapabilityEnvironment) -> &SkipVerdict {
        self.skip.get_or_init(|| {
            let Some(condition) = self.directives.skip_if() else {
                return SkipVerdict::Run;
            };
            let verdict = match condition.evaluate(env) {
                Ok(true) => SkipVerdict::Skip {
                    reason: format!("skip-if: {}", condition),
                },
                Ok(false) => SkipVerdict::Run,
                Err(e) if e.is_unknown_capability() => SkipVerdict::Skip {
                    reason: format!("skip-if: {}: {}", condition, e),
                },
                Err(e) => SkipVerdict::Skip {
                    reason: format!("skip-if: {}: evaluation failed: {}", condition, e),
                },
            };
            debug!(test = %self.id, ?verdict, "evaluated skip-if");
            verdict
        })
    }

    /// Cached verdict, if already evaluated
    pub fn cached_skip_verdict(&self) -> Option<&SkipVerdict> {
        self.skip.get()
    }
}

/// Root-relative identity of `path`, with `/` separators.
pub fn identity(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
