//! Shared vocabulary for the conformance harness.
//!
//! This crate provides the small set of types that both the harness and the
//! subject runtime's reports speak in.
//!
//! # Overview
//!
//! - [`Value`] - Capability values with JavaScript-like truthiness
//! - [`ThrownError`] - An error that escaped a test script
//! - [`ErrorKind`] - Constructor name of a thrown error
//! - [`SourcePosition`] - Location of a directive or condition token
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, ThrownError, Value};
//!
//! let threads = Value::Number(0.0);
//! assert!(!threads.is_truthy());
//!
//! let error = ThrownError::new(ErrorKind::TypeError, "too many arguments");
//! assert_eq!(error.kind.as_str(), "TypeError");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod source;
mod value;

pub use error::{ErrorKind, ThrownError};
pub use source::SourcePosition;
pub use value::Value;
