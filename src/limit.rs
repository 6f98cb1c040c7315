//! Unindexed fan-out cap
//!
//! The unindexed searcher does real work per repository, so one query may
//! only touch a bounded number of them. Input order is priority: the first
//! `max_repos` distinct repositories are kept with all their revisions, the
//! rest are excluded before anything is dispatched.

use crate::repo::{RepoId, RepositoryIdentity};
use crate::revision::RepositoryRevisions;
use std::collections::HashSet;

/// Split `repos` into the kept prefix and the excluded repositories.
///
/// Revisions do not count toward the cap. A repository listed twice counts
/// once; if its first occurrence was kept, later ones are kept too.
pub fn limit_unindexed_repos(
    repos: Vec<RepositoryRevisions>,
    max_repos: usize,
) -> (Vec<RepositoryRevisions>, Vec<RepositoryIdentity>) {
    let mut kept_ids: HashSet<RepoId> = HashSet::new();
    let mut excluded_ids: HashSet<RepoId> = HashSet::new();
    let mut kept = Vec::new();
    let mut excluded = Vec::new();

    for repo_revs in repos {
        let id = repo_revs.repo.id;
        if kept_ids.contains(&id) {
            kept.push(repo_revs);
        } else if kept_ids.len() < max_repos {
            kept_ids.insert(id);
            kept.push(repo_revs);
        } else if excluded_ids.insert(id) {
            excluded.push(repo_revs.repo);
        }
    }

    if !excluded.is_empty() {
        tracing::info!(
            "unindexed fan-out capped at {} repositories, {} excluded",
            max_repos,
            excluded.len()
        );
    }

    (kept, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevisionSpecifier;

    fn repo(name: &str) -> RepositoryIdentity {
        let id = name.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        RepositoryIdentity::new(id, name)
    }

    /// `a@1 a@2 b@1` -> two entries, `a` carrying both revisions.
    fn repo_revs(specs: &[&str]) -> Vec<RepositoryRevisions> {
        let mut out: Vec<RepositoryRevisions> = Vec::new();
        for spec in specs {
            let (name, rev) = spec.split_once('@').unwrap();
            match out.iter_mut().find(|r| r.repo.name == name) {
                Some(existing) => existing.revs.push(RevisionSpecifier::exact(rev)),
                None => out.push(RepositoryRevisions::new(repo(name), vec![RevisionSpecifier::exact(rev)])),
            }
        }
        out
    }

    fn names(repos: &[RepositoryIdentity]) -> Vec<&str> {
        repos.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_under_limit() {
        let input = repo_revs(&["a@1", "a@2", "b@1", "c@1"]);
        let (kept, excluded) = limit_unindexed_repos(input.clone(), 5);
        assert_eq!(kept, input);
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_limited_keeps_input_order() {
        let input = repo_revs(&["a@1", "b@1", "c@1", "d@1", "e@1", "f@1", "g@1"]);
        let (kept, excluded) = limit_unindexed_repos(input, 5);
        assert_eq!(kept, repo_revs(&["a@1", "b@1", "c@1", "d@1", "e@1"]));
        assert_eq!(names(&excluded), vec!["f", "g"]);
    }

    #[test]
    fn test_revisions_do_not_count() {
        let input = repo_revs(&["a@1", "a@2", "b@1", "c@1", "d@1", "e@1", "f@1"]);
        let (kept, excluded) = limit_unindexed_repos(input.clone(), 6);
        assert_eq!(kept, input);
        assert!(excluded.is_empty());

        let input = repo_revs(&["a@1", "a@2", "b@1", "c@1", "d@1", "e@1", "f@1", "f@2", "g@1"]);
        let (kept, excluded) = limit_unindexed_repos(input, 6);
        assert_eq!(kept, repo_revs(&["a@1", "a@2", "b@1", "c@1", "d@1", "e@1", "f@1", "f@2"]));
        assert_eq!(names(&excluded), vec!["g"]);
    }

    #[test]
    fn test_repeated_entries_count_once() {
        let a = repo("a");
        let b = repo("b");
        let input = vec![
            RepositoryRevisions::default_branch(a.clone()),
            RepositoryRevisions::default_branch(b.clone()),
            RepositoryRevisions::new(a.clone(), vec![RevisionSpecifier::exact("dev")]),
            RepositoryRevisions::default_branch(b.clone()),
        ];
        let (kept, excluded) = limit_unindexed_repos(input, 1);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.repo == a));
        assert_eq!(excluded, vec![b]);
    }

    #[test]
    fn test_zero_limit_excludes_everything() {
        let (kept, excluded) = limit_unindexed_repos(repo_revs(&["a@1", "b@1"]), 0);
        assert!(kept.is_empty());
        assert_eq!(names(&excluded), vec!["a", "b"]);
    }
}
