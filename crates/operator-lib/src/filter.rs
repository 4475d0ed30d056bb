//! Namespace and node filters
//!
//! Each dimension carries independent include and exclude lists of exact names or
//! patterns. An empty include list admits everything; an exclude match always wins.

use crate::error::{Error, Result};
use regex::Regex;

/// Compiled include/exclude filter for one dimension
#[derive(Debug, Clone)]
pub struct NameFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl NameFilter {
    /// Compile include and exclude patterns, rejecting any that are not valid
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    /// Whether a name passes the filter
    pub fn admits(&self, name: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(name))
    }
}

/// Validate a set of patterns without keeping the compiled form
pub fn validate(patterns: &[String]) -> Result<()> {
    compile_all(patterns).map(|_| ())
}

/// Validate a single free-form regular expression; empty means unset
pub fn validate_regex(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Ok(());
    }
    Regex::new(pattern).map(|_| ()).map_err(|e| Error::InvalidFilter {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| compile(p))
        .collect()
}

// Patterns are anchored so that a plain name only matches itself.
fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Error::InvalidFilter {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
