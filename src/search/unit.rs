//! One backend call for one repository revision, and what its failure means.

use crate::backend::{BackendError, SearchResponse, UnindexedSearcher};
use crate::pattern::PatternSpec;
use crate::results::{ResultBatch, SoftFailure};
use crate::revision::{RevisionOrigin, SearchUnit};
use crate::search::probe::repo_should_be_searched;
use crate::{Error, Result};
use std::time::Duration;

/// What a single unit contributed to the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Searched { matches: ResultBatch, limit_hit: bool },
    /// Nothing to search: the probe ruled it out, the repository is empty,
    /// or a glob-selected ref disappeared before it was searched.
    Skipped,
    Failed(SoftFailure),
}

/// Calls the unindexed searcher for one unit under a fixed timeout.
pub struct PerRepoSearcher<'a> {
    backend: &'a dyn UnindexedSearcher,
    timeout: Duration,
}

impl<'a> PerRepoSearcher<'a> {
    pub fn new(backend: &'a dyn UnindexedSearcher, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A call still running when the timeout elapses reports `DeadlineExceeded`.
    pub async fn search(&self, unit: &SearchUnit, pattern: &PatternSpec) -> std::result::Result<SearchResponse, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.search(unit, pattern)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::DeadlineExceeded),
        }
    }
}

/// Map a backend failure for `unit` onto the failure taxonomy.
///
/// `Ok` outcomes are recorded and the search goes on; `Err` aborts the call.
pub fn classify(unit: &SearchUnit, err: BackendError) -> Result<UnitOutcome> {
    if let Some(failure) = err.soft_failure() {
        tracing::warn!("{} classified as {}: {}", unit, failure, err);
        return Ok(UnitOutcome::Failed(failure));
    }

    match err {
        BackendError::RevisionNotFound { rev, .. } => match unit.origin {
            RevisionOrigin::Explicit => Err(Error::RevisionNotFound {
                repo: unit.repo.name.clone(),
                rev,
            }),
            // No default branch means the repository has no commits yet.
            RevisionOrigin::DefaultBranch => {
                tracing::debug!("{} is empty, skipping", unit.repo);
                Ok(UnitOutcome::Skipped)
            }
            RevisionOrigin::Glob => {
                tracing::warn!("ref {} vanished from {} after expansion", rev, unit.repo);
                Ok(UnitOutcome::Skipped)
            }
        },
        other => {
            tracing::error!("unexpected backend failure for {}: {}", unit, other);
            Err(Error::Backend {
                repo: unit.repo.name.clone(),
                message: other.to_string(),
            })
        }
    }
}

/// Probe (when the pattern asks for it), then search one unit.
pub async fn run_unit(searcher: &PerRepoSearcher<'_>, unit: &SearchUnit, pattern: &PatternSpec) -> Result<UnitOutcome> {
    match repo_should_be_searched(searcher, unit, pattern).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!("{} ruled out by preflight probe", unit);
            return Ok(UnitOutcome::Skipped);
        }
        Err(e) => return classify(unit, e),
    }

    match searcher.search(unit, pattern).await {
        Ok(response) => {
            tracing::debug!("{}: {} matches (limit hit: {})", unit, response.matches.len(), response.limit_hit);
            Ok(UnitOutcome::Searched {
                matches: response.matches,
                limit_hit: response.limit_hit,
            })
        }
        Err(e) => classify(unit, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::test_utils::{repo, single_match, FnSearcher};

    fn unit(name: &str, rev: &str, origin: RevisionOrigin) -> SearchUnit {
        SearchUnit::new(repo(name), rev, origin, Backend::Unindexed)
    }

    #[test]
    fn test_classify_soft_failures() {
        let u = unit("foo/cloning", "", RevisionOrigin::DefaultBranch);
        let out = classify(&u, BackendError::CloneInProgress { repo: "foo/cloning".into() }).unwrap();
        assert_eq!(out, UnitOutcome::Failed(SoftFailure::Cloning));

        let out = classify(&u, BackendError::RepoNotFound { repo: "foo/cloning".into() }).unwrap();
        assert_eq!(out, UnitOutcome::Failed(SoftFailure::Missing));

        let out = classify(&u, BackendError::DeadlineExceeded).unwrap();
        assert_eq!(out, UnitOutcome::Failed(SoftFailure::TimedOut));
    }

    #[test]
    fn test_classify_missing_revision_by_origin() {
        let err = || BackendError::RevisionNotFound { repo: "foo".into(), rev: "dev".into() };

        let explicit = classify(&unit("foo", "dev", RevisionOrigin::Explicit), err()).unwrap_err();
        assert!(explicit.is_revision_not_found());

        let default = classify(&unit("foo", "", RevisionOrigin::DefaultBranch), err()).unwrap();
        assert_eq!(default, UnitOutcome::Skipped);

        let glob = classify(&unit("foo", "dev", RevisionOrigin::Glob), err()).unwrap();
        assert_eq!(glob, UnitOutcome::Skipped);
    }

    #[test]
    fn test_classify_unexpected_is_fatal() {
        let err = classify(&unit("foo", "", RevisionOrigin::DefaultBranch), BackendError::Other("boom".into())).unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[tokio::test]
    async fn test_timeout_becomes_timedout() {
        let backend = FnSearcher::new(|u, _| Ok(single_match(u))).with_delay("slow", Duration::from_secs(5));
        let searcher = PerRepoSearcher::new(&backend, Duration::from_millis(20));

        let out = run_unit(&searcher, &unit("slow", "", RevisionOrigin::DefaultBranch), &PatternSpec::new("foo")).await.unwrap();
        assert_eq!(out, UnitOutcome::Failed(SoftFailure::TimedOut));
    }

    #[tokio::test]
    async fn test_run_unit_returns_matches() {
        let backend = FnSearcher::new(|u, _| Ok(single_match(u)));
        let searcher = PerRepoSearcher::new(&backend, Duration::from_secs(1));

        let out = run_unit(&searcher, &unit("foo", "main", RevisionOrigin::Explicit), &PatternSpec::new("foo")).await.unwrap();
        match out {
            UnitOutcome::Searched { matches, limit_hit } => {
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].uri(), "git://foo?main#main.go");
                assert!(!limit_hit);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
