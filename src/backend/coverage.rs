use crate::backend::Backend;
use crate::repo::RepoId;
use crate::revision::RepositoryRevisions;
use std::collections::HashSet;

/// Decides, once per repository, whether the index service or the unindexed
/// searcher handles it.
pub trait IndexCoverage: Send + Sync {
    fn backend_for(&self, repo: &RepositoryRevisions) -> Backend;
}

/// No index available: every repository goes to the unindexed searcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndex;

impl IndexCoverage for NoIndex {
    fn backend_for(&self, _repo: &RepositoryRevisions) -> Backend {
        Backend::Unindexed
    }
}

/// The index covers the default branch of a known set of repositories.
///
/// Any other revision, including ref globs, needs the unindexed searcher.
#[derive(Debug, Clone, Default)]
pub struct IndexedRepos {
    ids: HashSet<RepoId>,
}

impl IndexedRepos {
    pub fn new(ids: impl IntoIterator<Item = RepoId>) -> Self {
        Self { ids: ids.into_iter().collect() }
    }

    pub fn contains(&self, id: RepoId) -> bool {
        self.ids.contains(&id)
    }
}

impl IndexCoverage for IndexedRepos {
    fn backend_for(&self, repo: &RepositoryRevisions) -> Backend {
        if self.ids.contains(&repo.repo.id) && repo.is_default_only() {
            Backend::Indexed
        } else {
            Backend::Unindexed
        }
    }
}
