//! The single batched call to the index service.

use crate::backend::{BackendError, IndexedSearcher};
use crate::pattern::PatternSpec;
use crate::repo::{RepoId, RepositoryIdentity};
use crate::results::{FileMatch, ResultBatch, SoftFailure};
use crate::revision::{RevisionOrigin, SearchUnit};
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedOutcome {
    /// One batch per repository that had matches, in first-seen order.
    Searched { batches: Vec<ResultBatch>, limit_hit: bool },
    /// The whole request hit a soft failure; it applies to every unit.
    Failed(SoftFailure),
    /// The index found no default branch for this repository. It is skipped;
    /// the other units of the request still need an answer.
    EmptyRepository(RepositoryIdentity),
}

/// Search all indexed units in one request.
///
/// There is no per-repository signal in an index failure, so soft failures
/// (usually a timeout) classify every repository in the request. A missing
/// revision is fatal only when the caller named it. Anything else aborts the
/// call.
pub async fn search_indexed(
    index: &dyn IndexedSearcher,
    units: &[SearchUnit],
    pattern: &PatternSpec,
    timeout: Duration,
) -> Result<IndexedOutcome> {
    let response = match tokio::time::timeout(timeout, index.search(units, pattern)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::DeadlineExceeded),
    };

    match response {
        Ok(response) => {
            tracing::debug!(
                "index answered {} units with {} matches (limit hit: {})",
                units.len(),
                response.matches.len(),
                response.limit_hit
            );
            Ok(IndexedOutcome::Searched {
                batches: group_by_repo(response.matches),
                limit_hit: response.limit_hit,
            })
        }
        Err(e) => {
            if let Some(failure) = e.soft_failure() {
                tracing::warn!("index search over {} units classified as {}: {}", units.len(), failure, e);
                return Ok(IndexedOutcome::Failed(failure));
            }
            match e {
                BackendError::RevisionNotFound { repo, rev } => {
                    let mut named = units.iter().filter(|u| u.repo.name == repo);
                    let explicit = named
                        .clone()
                        .any(|u| u.origin == RevisionOrigin::Explicit && u.revision == rev);
                    match named.next() {
                        Some(unit) if !explicit => {
                            tracing::debug!("index reports no revision {:?} in {}, skipping", rev, unit.repo);
                            Ok(IndexedOutcome::EmptyRepository(unit.repo.clone()))
                        }
                        _ => Err(Error::RevisionNotFound { repo, rev }),
                    }
                }
                other => Err(Error::Backend {
                    repo: "<index>".to_string(),
                    message: other.to_string(),
                }),
            }
        }
    }
}

fn group_by_repo(matches: Vec<FileMatch>) -> Vec<ResultBatch> {
    let mut slots: HashMap<RepoId, usize> = HashMap::new();
    let mut batches: Vec<ResultBatch> = Vec::new();
    for m in matches {
        let slot = *slots.entry(m.repo.id).or_insert_with(|| {
            batches.push(Vec::new());
            batches.len() - 1
        });
        batches[slot].push(m);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, SearchResponse};
    use crate::test_utils::{repo, FnIndex};

    fn units(names: &[&str]) -> Vec<SearchUnit> {
        names
            .iter()
            .map(|n| SearchUnit::new(repo(n), "", RevisionOrigin::DefaultBranch, Backend::Indexed))
            .collect()
    }

    #[tokio::test]
    async fn test_groups_matches_per_repo() {
        let index = FnIndex::new(|_, _| {
            Ok(SearchResponse::new(
                vec![
                    FileMatch::new(repo("a"), "", "1.go"),
                    FileMatch::new(repo("b"), "", "1.go"),
                    FileMatch::new(repo("a"), "", "2.go"),
                ],
                true,
            ))
        });

        let out = search_indexed(&index, &units(&["a", "b"]), &PatternSpec::new("x"), Duration::from_secs(1)).await.unwrap();
        match out {
            IndexedOutcome::Searched { batches, limit_hit } => {
                assert!(limit_hit);
                assert_eq!(batches.len(), 2);
                assert_eq!(batches[0].len(), 2);
                assert_eq!(batches[0][1].path, "2.go");
                assert_eq!(batches[1][0].repo.name, "b");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(index.calls(), 1);
    }

    #[tokio::test]
    async fn test_index_timeout_is_soft() {
        let index = FnIndex::single_match_each().with_delay(Duration::from_secs(5));
        let out = search_indexed(&index, &units(&["a"]), &PatternSpec::new("x"), Duration::from_millis(20)).await.unwrap();
        assert_eq!(out, IndexedOutcome::Failed(SoftFailure::TimedOut));
    }

    #[tokio::test]
    async fn test_missing_default_branch_is_not_fatal() {
        let index = FnIndex::new(|_, _| {
            Err(BackendError::RevisionNotFound {
                repo: "b".into(),
                rev: "".into(),
            })
        });
        let out = search_indexed(&index, &units(&["a", "b"]), &PatternSpec::new("x"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, IndexedOutcome::EmptyRepository(repo("b")));
    }

    #[tokio::test]
    async fn test_missing_explicit_revision_is_fatal() {
        let index = FnIndex::new(|_, _| {
            Err(BackendError::RevisionNotFound {
                repo: "a".into(),
                rev: "dev".into(),
            })
        });
        let units = vec![SearchUnit::new(repo("a"), "dev", RevisionOrigin::Explicit, Backend::Indexed)];
        let err = search_indexed(&index, &units, &PatternSpec::new("x"), Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_revision_not_found());
    }

    #[tokio::test]
    async fn test_index_fault_is_fatal() {
        let index = FnIndex::new(|_, _| Err(BackendError::Other("shard corrupt".into())));
        let err = search_indexed(&index, &units(&["a"]), &PatternSpec::new("x"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }
}
