//! Resolving textual `repo@revs` specs through the repository catalog

use crate::backend::{BackendError, RepoCatalog};
use crate::revision::{parse_repository_revisions, RepositoryRevisions};
use crate::{Error, Result};

/// Outcome of resolving a list of repository specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRepos {
    pub repos: Vec<RepositoryRevisions>,
    /// Names the catalog does not know about.
    pub missing: Vec<String>,
}

/// Parse and resolve `specs` in order.
///
/// Unknown names are collected in `missing` rather than failing the call;
/// a malformed spec or any other catalog error is fatal.
pub async fn resolve_repo_specs(catalog: &dyn RepoCatalog, specs: &[&str]) -> Result<ResolvedRepos> {
    let mut resolved = ResolvedRepos::default();
    for spec in specs {
        let (name, revs) = parse_repository_revisions(spec)?;
        match catalog.resolve(&name).await {
            Ok(repo) => resolved.repos.push(RepositoryRevisions::new(repo, revs)),
            Err(BackendError::RepoNotFound { .. }) => {
                tracing::debug!("catalog has no repository named {}", name);
                resolved.missing.push(name);
            }
            Err(e) => {
                return Err(Error::Backend {
                    repo: name,
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(resolved)
}
