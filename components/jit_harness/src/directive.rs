//! Pragma-line directives.
//!
//! A test opts into harness behaviour with a single leading comment line:
//!
//! ```text
//! // |jit-test| slow; allow-oom; --fast-warmup; skip-if: !('oomTest' in this)
//! ```
//!
//! The clause vocabulary is fixed. Anything outside it is a
//! [`DirectiveError`], which makes that one test a configuration error
//! without touching the rest of the batch.

use crate::condition::{Condition, ConditionError};
use crate::fault::{GcZeal, ThreadType};
use crate::realm::IsolationKind;
use core_types::SourcePosition;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Marker token that identifies the pragma line
pub const PRAGMA_MARKER: &str = "|jit-test|";

/// Errors in a pragma line
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectiveError {
    /// Clause that is neither a flag, an option nor a skip-if
    #[error("{position}: malformed clause `{clause}`")]
    MalformedClause {
        clause: String,
        position: SourcePosition,
    },

    /// Key outside the vocabulary
    #[error("{position}: unknown directive `{key}`")]
    UnknownDirective {
        key: String,
        position: SourcePosition,
    },

    /// `key=` or bare `skip-if`
    #[error("{position}: directive `{key}` requires a value")]
    MissingValue {
        key: String,
        position: SourcePosition,
    },

    /// Value the key does not accept
    #[error("{position}: invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
        position: SourcePosition,
    },

    /// Same key twice
    #[error("{position}: duplicate directive `{key}`")]
    Duplicate {
        key: String,
        position: SourcePosition,
    },

    /// Second `skip-if` clause
    #[error("{position}: more than one skip-if clause")]
    DuplicateSkipIf { position: SourcePosition },

    /// Second pragma line among the leading comments
    #[error("line {line}: only one `{marker}` line is allowed", marker = PRAGMA_MARKER)]
    SecondPragma { line: u32 },

    /// `skip-if` expression does not parse
    #[error("{position}: invalid skip-if expression: {error}")]
    InvalidCondition {
        error: ConditionError,
        position: SourcePosition,
    },
}

/// Boolean flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Long-running test; timeout is multiplied
    Slow,
    /// Resource-hungry test; timeout multiplied and concurrency limited
    Heavy,
    /// Fuzz sweep, and an uncaught out-of-memory error is acceptable
    AllowOom,
    /// An uncaught over-recursion error is acceptable
    AllowOverrecursed,
    /// Injection points re-arm after firing
    OomRearm,
    /// Injection points fire once
    OomOneShot,
    /// Test is expected to terminate abnormally
    Crash,
    /// Attach an observer to the main realm
    Debugger,
}

impl Flag {
    /// Every flag, in canonical order
    pub const ALL: [Flag; 8] = [
        Flag::Slow,
        Flag::Heavy,
        Flag::AllowOom,
        Flag::AllowOverrecursed,
        Flag::OomRearm,
        Flag::OomOneShot,
        Flag::Crash,
        Flag::Debugger,
    ];

    /// Directive spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Slow => "slow",
            Flag::Heavy => "heavy",
            Flag::AllowOom => "allow-oom",
            Flag::AllowOverrecursed => "allow-overrecursed",
            Flag::OomRearm => "oom-rearm",
            Flag::OomOneShot => "oom-oneshot",
            Flag::Crash => "crash",
            Flag::Debugger => "debugger",
        }
    }

    /// Look a flag up by spelling
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// `key=value` options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// Expected thrown error kind
    Error,
    /// Expected message, `/regex/` or substring
    ErrorMessage,
    /// Expected process exit status
    ExitStatus,
    /// Explicit allocation indices to fail
    OomAt,
    /// Thread type the injection targets
    OomThread,
    /// GC zeal setting for the main realm
    GcZeal,
    /// Isolation of an additional realm
    Realm,
    /// Comma-separated tags for filtering
    Tags,
}

impl OptionKey {
    /// Every option key, in canonical order
    pub const ALL: [OptionKey; 8] = [
        OptionKey::Error,
        OptionKey::ErrorMessage,
        OptionKey::ExitStatus,
        OptionKey::OomAt,
        OptionKey::OomThread,
        OptionKey::GcZeal,
        OptionKey::Realm,
        OptionKey::Tags,
    ];

    /// Directive spelling
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKey::Error => "error",
            OptionKey::ErrorMessage => "error-message",
            OptionKey::ExitStatus => "exitstatus",
            OptionKey::OomAt => "oom-at",
            OptionKey::OomThread => "oom-thread",
            OptionKey::GcZeal => "gc-zeal",
            OptionKey::Realm => "realm",
            OptionKey::Tags => "tags",
        }
    }

    /// Look a key up by spelling
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Check a value against what the key accepts.
    fn validate(self, value: &str) -> Result<(), String> {
        match self {
            OptionKey::Error => {
                if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                    Ok(())
                } else {
                    Err("expected an error constructor name".to_string())
                }
            }
            OptionKey::ErrorMessage => match regex_literal(value) {
                Some(pattern) => Regex::new(pattern).map(|_| ()).map_err(|e| e.to_string()),
                None => Ok(()),
            },
            OptionKey::ExitStatus => value
                .parse::<i32>()
                .map(|_| ())
                .map_err(|_| "expected an integer".to_string()),
            OptionKey::OomAt => {
                for part in value.split(',') {
                    part.trim()
                        .parse::<u64>()
                        .map_err(|_| format!("`{}` is not an allocation index", part.trim()))?;
                }
                Ok(())
            }
            OptionKey::OomThread => value
                .parse::<ThreadType>()
                .map(|_| ())
                .map_err(|e| e.to_string()),
            OptionKey::GcZeal => GcZeal::parse(value).map(|_| ()).map_err(|e| e.to_string()),
            OptionKey::Realm => value
                .parse::<IsolationKind>()
                .map(|_| ())
                .map_err(|e| e.to_string()),
            OptionKey::Tags => {
                if value.split(',').all(|t| is_name(t.trim())) {
                    Ok(())
                } else {
                    Err("tags must be comma-separated names".to_string())
                }
            }
        }
    }
}

/// Strip the slashes of a `/pattern/` literal.
pub fn regex_literal(value: &str) -> Option<&str> {
    value
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|_| value.len() >= 2)
}

/// One clause of a pragma line
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Bare flag
    Flag(Flag),
    /// `key=value`
    Option { key: OptionKey, value: String },
    /// `--name` or `--name=value`, passed to the runtime
    EngineFlag { name: String, value: Option<String> },
    /// `skip-if: <expr>`
    SkipIf(Condition),
}

impl Directive {
    /// The uniqueness key of this directive
    pub fn key(&self) -> &str {
        match self {
            Directive::Flag(flag) => flag.as_str(),
            Directive::Option { key, .. } => key.as_str(),
            Directive::EngineFlag { name, .. } => name,
            Directive::SkipIf(_) => "skip-if",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Flag(flag) => f.write_str(flag.as_str()),
            Directive::Option { key, value } => write!(f, "{}={}", key.as_str(), value),
            Directive::EngineFlag { name, value: None } => f.write_str(name),
            Directive::EngineFlag {
                name,
                value: Some(value),
            } => write!(f, "{}={}", name, value),
            Directive::SkipIf(condition) => write!(f, "skip-if: {}", condition),
        }
    }
}

/// Ordered set of unique directives
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectiveSet {
    directives: Vec<Directive>,
}

impl DirectiveSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate the pragma line among the leading comments of `source` and
    /// parse it. No pragma line means no directives.
    pub fn parse_source(source: &str) -> Result<Self, DirectiveError> {
        let mut found: Option<(u32, &str)> = None;

        for (index, line) in source.lines().enumerate() {
            let line_no = index as u32 + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with("//") {
                break;
            }
            if line.contains(PRAGMA_MARKER) {
                if found.is_some() {
                    return Err(DirectiveError::SecondPragma { line: line_no });
                }
                found = Some((line_no, line));
            }
        }

        match found {
            Some((line_no, line)) => Self::parse_pragma_line(line, line_no),
            None => Ok(Self::new()),
        }
    }

    /// Parse a single line containing the pragma marker.
    ///
    /// Text before the marker (typically `//`) is ignored. A line without
    /// the marker is treated as a bare clause list.
    pub fn parse_pragma_line(line: &str, line_no: u32) -> Result<Self, DirectiveError> {
        let start = line
            .find(PRAGMA_MARKER)
            .map(|i| i + PRAGMA_MARKER.len())
            .unwrap_or(0);
        let mut set = Self::new();
        let mut offset = start;

        for clause in line[start..].split(';') {
            let leading = clause.len() - clause.trim_start().len();
            let position = SourcePosition::in_line(line_no, line, offset + leading);
            offset += clause.len() + 1;

            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            let directive = parse_clause(clause, position)?;
            set.insert(directive, position)?;
        }
        Ok(set)
    }

    /// Add a directive, rejecting duplicates.
    pub fn insert(
        &mut self,
        directive: Directive,
        position: SourcePosition,
    ) -> Result<(), DirectiveError> {
        if self.directives.iter().any(|d| d.key() == directive.key()) {
            return Err(match directive {
                Directive::SkipIf(_) => DirectiveError::DuplicateSkipIf { position },
                other => DirectiveError::Duplicate {
                    key: other.key().to_string(),
                    position,
                },
            });
        }
        self.directives.push(directive);
        Ok(())
    }

    /// Directives in source order
    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter()
    }

    /// Number of directives
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Whether there are no directives
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Whether `flag` is present
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.directives
            .iter()
            .any(|d| matches!(d, Directive::Flag(f) if *f == flag))
    }

    /// Value of an option
    pub fn option(&self, key: OptionKey) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::Option { key: k, value } if *k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// The `skip-if` condition
    pub fn skip_if(&self) -> Option<&Condition> {
        self.directives.iter().find_map(|d| match d {
            Directive::SkipIf(condition) => Some(condition),
            _ => None,
        })
    }

    /// Command-line arguments for the runtime
    pub fn engine_args(&self) -> Vec<String> {
        self.directives
            .iter()
            .filter(|d| matches!(d, Directive::EngineFlag { .. }))
            .map(ToString::to_string)
            .collect()
    }

    /// Tags from `tags=` plus the names of all flags
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self
            .option(OptionKey::Tags)
            .map(|v| v.split(',').map(str::trim).collect())
            .unwrap_or_default();
        for directive in &self.directives {
            if let Directive::Flag(flag) = directive {
                tags.push(flag.as_str());
            }
        }
        tags
    }

    /// The set as a `//` comment line
    pub fn to_pragma_comment(&self) -> String {
        format!("// {}", self)
    }
}

impl fmt::Display for DirectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PRAGMA_MARKER)?;
        for (i, directive) in self.directives.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            write!(f, "{}{}", sep, directive)?;
        }
        Ok(())
    }
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_clause(clause: &str, position: SourcePosition) -> Result<Directive, DirectiveError> {
    if let Some(rest) = clause.strip_prefix("skip-if") {
        let rest = rest.trim_start();
        if let Some(expr) = rest.strip_prefix(':') {
            if expr.trim().is_empty() {
                return Err(DirectiveError::MissingValue {
                    key: "skip-if".to_string(),
                    position,
                });
            }
            return Condition::parse(expr)
                .map(Directive::SkipIf)
                .map_err(|error| DirectiveError::InvalidCondition { error, position });
        }
        if rest.is_empty() {
            return Err(DirectiveError::MissingValue {
                key: "skip-if".to_string(),
                position,
            });
        }
    }

    if let Some(body) = clause.strip_prefix("--") {
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (body, None),
        };
        if !is_name(name) {
            return Err(DirectiveError::MalformedClause {
                clause: clause.to_string(),
                position,
            });
        }
        if value.is_some_and(str::is_empty) {
            return Err(DirectiveError::MissingValue {
                key: format!("--{}", name),
                position,
            });
        }
        return Ok(Directive::EngineFlag {
            name: format!("--{}", name),
            value: value.map(str::to_string),
        });
    }

    if let Some((key, value)) = clause.split_once('=') {
        let (key, value) = (key.trim(), value.trim());
        if !is_name(key) {
            return Err(DirectiveError::MalformedClause {
                clause: clause.to_string(),
                position,
            });
        }
        let key_kind = OptionKey::from_name(key).ok_or_else(|| DirectiveError::UnknownDirective {
            key: key.to_string(),
            position,
        })?;
        if value.is_empty() {
            return Err(DirectiveError::MissingValue {
                key: key.to_string(),
                position,
            });
        }
        key_kind
            .validate(value)
            .map_err(|reason| DirectiveError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                reason,
                position,
            })?;
        return Ok(Directive::Option {
            key: key_kind,
            value: value.to_string(),
        });
    }

    if is_name(clause) {
        if let Some(flag) = Flag::from_name(clause) {
            return Ok(Directive::Flag(flag));
        }
        if OptionKey::from_name(clause).is_some() {
            return Err(DirectiveError::MissingValue {
                key: clause.to_string(),
                position,
            });
        }
        return Err(DirectiveError::UnknownDirective {
            key: clause.to_string(),
            position,
        });
    }

    Err(DirectiveError::MalformedClause {
        clause: clause.to_string(),
        position,
    })
}
