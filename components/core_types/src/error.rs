//! Thrown-error signatures.
//!
//! Test scripts declare the kind of error they expect to escape, and the
//! subject runtime reports the kind of error that actually escaped. Both
//! sides are compared through the types in this module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of a thrown error.
///
/// These correspond to JavaScript's built-in error constructors; anything
/// else the runtime throws is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// Syntax error in source code
    SyntaxError,
    /// Type error (e.g., calling a non-function)
    TypeError,
    /// Reference to an undefined variable
    ReferenceError,
    /// Value out of allowed range
    RangeError,
    /// Error in eval() function
    EvalError,
    /// Error in URI handling functions
    URIError,
    /// Internal engine error (out of memory, over-recursion)
    InternalError,
    /// Any other constructor name
    Other(String),
}

impl ErrorKind {
    /// The constructor name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::URIError => "URIError",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::Other(name) => name,
        }
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Error" => ErrorKind::Error,
            "SyntaxError" => ErrorKind::SyntaxError,
            "TypeError" => ErrorKind::TypeError,
            "ReferenceError" => ErrorKind::ReferenceError,
            "RangeError" => ErrorKind::RangeError,
            "EvalError" => ErrorKind::EvalError,
            "URIError" => ErrorKind::URIError,
            "InternalError" => ErrorKind::InternalError,
            other => ErrorKind::Other(other.to_string()),
        })
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error that escaped the test script.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, ThrownError};
///
/// let error = ThrownError::new(ErrorKind::TypeError, "undefined is not a function");
/// assert_eq!(error.to_string(), "TypeError: undefined is not a function");
///
/// let parsed = ThrownError::parse_line("uncaught exception: RangeError: bad length").unwrap();
/// assert_eq!(parsed.kind, ErrorKind::RangeError);
/// assert_eq!(parsed.message, "bad length");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrownError {
    /// The type of error
    #[serde(rename = "error")]
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl ThrownError {
    /// Create a thrown error signature.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Parse a runtime's uncaught-error line: `[uncaught exception: ]Kind: message`.
    ///
    /// The kind must look like a constructor name (an identifier ending in
    /// `Error`), so ordinary `key: value` output is not mistaken for an error.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let line = line.strip_prefix("uncaught exception:").unwrap_or(line).trim();
        let (kind, message) = line.split_once(':')?;
        let kind = kind.trim();
        let looks_like_ctor = kind.ends_with("Error")
            && kind
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !looks_like_ctor {
            return None;
        }
        Some(Self::new(kind.to_string().into(), message.trim()))
    }

    /// Whether this is the runtime's out-of-memory error.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind, ErrorKind::InternalError | ErrorKind::Error)
            && self.message.contains("out of memory")
    }

    /// Whether this is the runtime's stack-exhaustion error.
    pub fn is_overrecursed(&self) -> bool {
        matches!(self.kind, ErrorKind::InternalError | ErrorKind::RangeError)
            && self.message.contains("too much recursion")
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
