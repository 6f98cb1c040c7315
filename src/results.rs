//! Search results and the per-repository failure classification
//!
//! - `FileMatch` / `LineMatch`: what backends return
//! - `ResultBatch`: the matches one unit produced
//! - `SearchCommon`: cloning / missing / timedout sets plus `limit_hit`

use crate::repo::RepositoryIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One matching line inside a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineMatch {
    /// 0-indexed line number
    pub line_number: u32,
    pub preview: String,
    /// Byte ranges of the match within `preview`
    pub offsets: Vec<(u32, u32)>,
}

/// A file in one repository revision that matched the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMatch {
    pub repo: RepositoryIdentity,
    /// Revision the match was found at (empty = default branch)
    pub revision: String,
    pub path: String,
    pub line_matches: Vec<LineMatch>,
    /// The backend stopped collecting lines in this file early.
    pub limit_hit: bool,
}

impl FileMatch {
    pub fn new(repo: RepositoryIdentity, revision: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo,
            revision: revision.into(),
            path: path.into(),
            line_matches: Vec::new(),
            limit_hit: false,
        }
    }

    /// Stable resource locator, `git://<repo>?<rev>#<path>`.
    pub fn uri(&self) -> String {
        format!("git://{}?{}#{}", self.repo.name, self.revision, self.path)
    }
}

/// Matches produced by a single search unit.
pub type ResultBatch = Vec<FileMatch>;

/// Expected per-repository conditions that are recorded rather than raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftFailure {
    Cloning,
    Missing,
    TimedOut,
}

impl SoftFailure {
    // missing > cloning > timedout
    fn rank(self) -> u8 {
        match self {
            SoftFailure::Missing => 2,
            SoftFailure::Cloning => 1,
            SoftFailure::TimedOut => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SoftFailure::Cloning => "cloning",
            SoftFailure::Missing => "missing",
            SoftFailure::TimedOut => "timedout",
        }
    }
}

impl fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification returned alongside the merged results.
///
/// `cloning`, `missing` and `timedout` are disjoint: a repository that lands
/// in more than one keeps only the highest-precedence bucket
/// (missing, then cloning, then timedout), so the outcome does not depend
/// on completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCommon {
    /// Some backend truncated its results at the per-search cap.
    pub limit_hit: bool,
    pub cloning: BTreeSet<RepositoryIdentity>,
    pub missing: BTreeSet<RepositoryIdentity>,
    pub timedout: BTreeSet<RepositoryIdentity>,
    /// Repositories that produced an answer (possibly empty).
    pub searched: BTreeSet<RepositoryIdentity>,
    /// Subset of `searched` answered by the index service.
    pub indexed: BTreeSet<RepositoryIdentity>,
}

impl SearchCommon {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_mut(&mut self, failure: SoftFailure) -> &mut BTreeSet<RepositoryIdentity> {
        match failure {
            SoftFailure::Cloning => &mut self.cloning,
            SoftFailure::Missing => &mut self.missing,
            SoftFailure::TimedOut => &mut self.timedout,
        }
    }

    /// The bucket a repository currently sits in, if any.
    pub fn failure_of(&self, repo: &RepositoryIdentity) -> Option<SoftFailure> {
        if self.missing.contains(repo) {
            Some(SoftFailure::Missing)
        } else if self.cloning.contains(repo) {
            Some(SoftFailure::Cloning)
        } else if self.timedout.contains(repo) {
            Some(SoftFailure::TimedOut)
        } else {
            None
        }
    }

    /// Place `repo` in the bucket for `failure`, honoring precedence.
    pub fn record(&mut self, repo: RepositoryIdentity, failure: SoftFailure) {
        match self.failure_of(&repo) {
            Some(current) if current.rank() >= failure.rank() => {}
            Some(current) => {
                self.set_mut(current).remove(&repo);
                self.set_mut(failure).insert(repo);
            }
            None => {
                self.set_mut(failure).insert(repo);
            }
        }
    }

    /// Fold another classification into this one.
    pub fn update(&mut self, other: &SearchCommon) {
        self.limit_hit |= other.limit_hit;
        for repo in &other.missing {
            self.record(repo.clone(), SoftFailure::Missing);
        }
        for repo in &other.cloning {
            self.record(repo.clone(), SoftFailure::Cloning);
        }
        for repo in &other.timedout {
            self.record(repo.clone(), SoftFailure::TimedOut);
        }
        self.searched.extend(other.searched.iter().cloned());
        self.indexed.extend(other.indexed.iter().cloned());
    }

    pub fn has_soft_failures(&self) -> bool {
        !(self.cloning.is_empty() && self.missing.is_empty() && self.timedout.is_empty())
    }
}

impl fmt::Display for SearchCommon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Search Summary:")?;
        writeln!(f, "  Searched: {} ({} indexed)", self.searched.len(), self.indexed.len())?;
        writeln!(f, "  Cloning: {}", self.cloning.len())?;
        writeln!(f, "  Missing: {}", self.missing.len())?;
        writeln!(f, "  Timed out: {}", self.timedout.len())?;
        write!(f, "  Limit hit: {}", self.limit_hit)
    }
}

/// Merge per-unit batches into one list capped at `limit`.
///
/// When the total fits, batches are concatenated in the given order.
/// Otherwise matches are taken round-robin, one from each batch per pass,
/// so a single large repository cannot crowd out the rest. Returns whether
/// anything was dropped.
pub fn flatten_file_matches(batches: Vec<ResultBatch>, limit: usize) -> (Vec<FileMatch>, bool) {
    let total: usize = batches.iter().map(Vec::len).sum();
    if total <= limit {
        return (batches.into_iter().flatten().collect(), false);
    }

    let mut iters: Vec<_> = batches.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(limit);
    while out.len() < limit {
        let mut progressed = false;
        for it in iters.iter_mut() {
            if out.len() >= limit {
                break;
            }
            if let Some(m) = it.next() {
                out.push(m);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    (out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: u32, name: &str) -> RepositoryIdentity {
        RepositoryIdentity::new(id, name)
    }

    fn matches(r: &RepositoryIdentity, n: usize) -> ResultBatch {
        (0..n).map(|i| FileMatch::new(r.clone(), "", format!("f{}.go", i))).collect()
    }

    #[test]
    fn test_uri() {
        let m = FileMatch::new(repo(1, "foo"), "branch3", "main.go");
        assert_eq!(m.uri(), "git://foo?branch3#main.go");
    }

    #[test]
    fn test_record_precedence_is_order_independent() {
        let a = repo(1, "a");

        let mut first = SearchCommon::new();
        first.record(a.clone(), SoftFailure::TimedOut);
        first.record(a.clone(), SoftFailure::Missing);
        first.record(a.clone(), SoftFailure::Cloning);

        let mut second = SearchCommon::new();
        second.record(a.clone(), SoftFailure::Cloning);
        second.record(a.clone(), SoftFailure::Missing);
        second.record(a.clone(), SoftFailure::TimedOut);

        assert_eq!(first, second);
        assert_eq!(first.failure_of(&a), Some(SoftFailure::Missing));
        assert!(first.cloning.is_empty());
        assert!(first.timedout.is_empty());
    }

    #[test]
    fn test_update_merges_flags_and_sets() {
        let mut left = SearchCommon::new();
        left.record(repo(1, "a"), SoftFailure::TimedOut);

        let mut right = SearchCommon::new();
        right.limit_hit = true;
        right.record(repo(1, "a"), SoftFailure::Cloning);
        right.searched.insert(repo(2, "b"));

        left.update(&right);
        assert!(left.limit_hit);
        assert_eq!(left.failure_of(&repo(1, "a")), Some(SoftFailure::Cloning));
        assert!(left.searched.contains(&repo(2, "b")));
    }

    #[test]
    fn test_common_json_shape() {
        let mut common = SearchCommon::new();
        common.record(repo(7, "foo/slow"), SoftFailure::TimedOut);
        common.limit_hit = true;

        let json = serde_json::to_value(&common).unwrap();
        assert_eq!(json["limit_hit"], serde_json::json!(true));
        assert_eq!(json["timedout"], serde_json::json!([{ "id": 7, "name": "foo/slow" }]));
        assert_eq!(json["cloning"], serde_json::json!([]));

        let back: SearchCommon = serde_json::from_value(json).unwrap();
        assert_eq!(back, common);
    }

    #[test]
    fn test_flatten_under_limit_concatenates() {
        let a = repo(1, "a");
        let b = repo(2, "b");
        let (out, truncated) = flatten_file_matches(vec![matches(&a, 2), matches(&b, 1)], 30);
        assert!(!truncated);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].repo, b);
    }

    #[test]
    fn test_flatten_round_robin_over_limit() {
        let a = repo(1, "a");
        let b = repo(2, "b");
        let c = repo(3, "c");
        let (out, truncated) = flatten_file_matches(vec![matches(&a, 10), matches(&b, 1), matches(&c, 3)], 5);
        assert!(truncated);
        let names: Vec<_> = out.iter().map(|m| m.repo.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "a", "c"]);
    }
}
