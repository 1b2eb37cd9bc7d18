//! Source positions for directive and condition diagnostics.

use std::fmt;

/// Represents a position in a test file.
///
/// Used for error reporting to point at the offending clause or token.
///
/// # Examples
///
/// ```
/// use core_types::SourcePosition;
///
/// let pos = SourcePosition {
///     line: 1,
///     column: 14,
///     offset: 13,
/// };
///
/// assert_eq!(pos.to_string(), "1:14");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePosition {
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed, in characters)
    pub column: u32,
    /// Byte offset from the start of the scanned text
    pub offset: usize,
}

impl SourcePosition {
    /// Position of a byte offset within a single line of text.
    pub fn in_line(line: u32, text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let column = text
            .get(..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(offset) as u32
            + 1;
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
