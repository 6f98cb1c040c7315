//! Query configuration handed to every backend call of one search

use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on file matches returned by one search.
pub const DEFAULT_FILE_MATCH_LIMIT: usize = 30;

/// Default per-unit backend timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(500);

/// What to search for and how much of it. Immutable for the duration of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Pattern text as understood by the backends.
    pub pattern: String,
    pub is_regexp: bool,
    pub is_case_sensitive: bool,
    /// Per-search result cap.
    pub file_match_limit: usize,
    /// Only search file paths matching these regexes.
    pub include_patterns: Vec<String>,
    /// Only search repositories containing a file path matching each of these.
    pub files_must_include: Vec<String>,
    /// Skip repositories containing a file path matching any of these.
    pub files_must_exclude: Vec<String>,
    /// Match the pattern against file paths as well as content.
    pub pattern_matches_path: bool,
    pub fetch_timeout: Duration,
}

impl PatternSpec {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_regexp: false,
            is_case_sensitive: false,
            file_match_limit: DEFAULT_FILE_MATCH_LIMIT,
            include_patterns: Vec::new(),
            files_must_include: Vec::new(),
            files_must_exclude: Vec::new(),
            pattern_matches_path: false,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_file_match_limit(mut self, limit: usize) -> Self {
        self.file_match_limit = limit;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn must_include(mut self, path_pattern: impl Into<String>) -> Self {
        self.files_must_include.push(path_pattern.into());
        self
    }

    pub fn must_exclude(mut self, path_pattern: impl Into<String>) -> Self {
        self.files_must_exclude.push(path_pattern.into());
        self
    }

    /// True when the preflight probe has anything to check.
    pub fn needs_probe(&self) -> bool {
        !self.files_must_include.is_empty() || !self.files_must_exclude.is_empty()
    }

    /// Reject path filters that are not valid regexes before any backend is hit.
    pub fn validate(&self) -> Result<()> {
        let path_patterns = self
            .include_patterns
            .iter()
            .chain(&self.files_must_include)
            .chain(&self.files_must_exclude);
        for p in path_patterns {
            Regex::new(p)?;
        }
        if self.is_regexp {
            Regex::new(&self.pattern)?;
        }
        Ok(())
    }

    /// The reduced query the preflight probe issues for one path filter:
    /// no content pattern, path-only matching, and a single hit is enough.
    pub fn probe_for(&self, path_pattern: &str) -> PatternSpec {
        PatternSpec {
            pattern: String::new(),
            is_regexp: true,
            is_case_sensitive: self.is_case_sensitive,
            file_match_limit: 1,
            include_patterns: vec![path_pattern.to_string()],
            files_must_include: Vec::new(),
            files_must_exclude: Vec::new(),
            pattern_matches_path: true,
            fetch_timeout: self.fetch_timeout,
        }
    }
}
