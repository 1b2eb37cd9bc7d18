//! Test selection by identity glob and by tag.

use crate::error::{HarnessError, HarnessResult};
use crate::test_case::TestCase;
use regex::Regex;

/// Translate a path glob to an anchored regex.
///
/// `**` crosses directories, `*` and `?` do not. A glob without wildcards
/// also selects everything below it when it names a directory.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut has_wildcard = false;
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                has_wildcard = true;
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => {
                has_wildcard = true;
                out.push_str("[^/]*");
            }
            '?' => {
                has_wildcard = true;
                out.push_str("[^/]");
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    if !has_wildcard {
        out.push_str("(?:/.*)?");
    }
    out.push('$');
    out
}

/// Path and tag filter applied during discovery
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    paths: Vec<Regex>,
    tags: Vec<String>,
}

impl TestFilter {
    pub fn new(paths: &[String], tags: &[String]) -> HarnessResult<Self> {
        let paths = paths
            .iter()
            .map(|glob| {
                Regex::new(&glob_to_regex(glob.trim_end_matches('/'))).map_err(|e| {
                    HarnessError::InvalidFilter {
                        pattern: glob.clone(),
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<HarnessResult<Vec<_>>>()?;
        Ok(Self {
            paths,
            tags: tags.to_vec(),
        })
    }

    /// Whether the filter selects everything
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.tags.is_empty()
    }

    /// Identity-only check, usable before a test has loaded
    pub fn matches_path(&self, id: &str) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|re| re.is_match(id))
    }

    pub fn matches(&self, test: &TestCase) -> bool {
        if !self.matches_path(test.id()) {
            return false;
        }
        if self.tags.is_empty() {
            return true;
        }
        let tags = test.tags();
        self.tags.iter().any(|t| tags.contains(&t.as_str()))
    }
}
