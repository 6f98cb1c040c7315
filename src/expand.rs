//! Revision expansion
//!
//! Turns a repository's declared revision specifiers into concrete
//! `SearchUnit`s. Exact names pass straight through; ref globs are resolved
//! against the ref-listing service, which is only called when a glob is
//! present.

use crate::backend::{Backend, BackendError, GitRef, RefLister};
use crate::revision::{is_default_rev, RepositoryRevisions, RevisionOrigin, RevisionSpecifier, SearchUnit};
use crate::Result;
use glob::Pattern;

/// A compiled ref glob.
///
/// Normalization: a trailing `/` is dropped and `refs/` is prefixed when
/// missing. A glob with no metacharacters names a ref or a whole namespace:
/// `refs/heads/wip` matches `refs/heads/wip` and everything under it.
#[derive(Debug, Clone)]
pub struct RefGlob {
    literal: Option<String>,
    pattern: Option<Pattern>,
}

impl RefGlob {
    pub fn compile(glob: &str) -> Result<Self> {
        let mut normalized = glob.trim_end_matches('/').to_string();
        if !normalized.starts_with("refs/") {
            normalized = format!("refs/{}", normalized);
        }

        if normalized.contains(['*', '?', '[']) {
            Ok(Self {
                literal: None,
                pattern: Some(Pattern::new(&normalized)?),
            })
        } else {
            Ok(Self {
                literal: Some(normalized),
                pattern: None,
            })
        }
    }

    pub fn matches(&self, ref_name: &str) -> bool {
        if let Some(literal) = &self.literal {
            return ref_name == literal
                || ref_name.strip_prefix(literal.as_str()).is_some_and(|rest| rest.starts_with('/'));
        }
        self.pattern.as_ref().is_some_and(|p| p.matches(ref_name))
    }
}

/// Include and exclude globs of one repository.
#[derive(Debug, Clone, Default)]
pub struct RefGlobs {
    include: Vec<RefGlob>,
    exclude: Vec<RefGlob>,
}

impl RefGlobs {
    /// Compile the glob specifiers in `specs`; exact ones are ignored.
    pub fn compile<'a>(specs: impl IntoIterator<Item = &'a RevisionSpecifier>) -> Result<Self> {
        let mut globs = RefGlobs::default();
        for spec in specs {
            match spec {
                RevisionSpecifier::RefGlob(g) => globs.include.push(RefGlob::compile(g)?),
                RevisionSpecifier::ExcludeRefGlob(g) => globs.exclude.push(RefGlob::compile(g)?),
                RevisionSpecifier::Exact(_) => {}
            }
        }
        Ok(globs)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// A ref is selected when some include glob matches and no exclude glob
    /// does. Exclusions alone select nothing.
    pub fn matches(&self, ref_name: &str) -> bool {
        self.include.iter().any(|g| g.matches(ref_name)) && !self.exclude.iter().any(|g| g.matches(ref_name))
    }
}

/// Check every repository's globs up front so a typo fails before dispatch.
pub fn validate_ref_globs(repos: &[RepositoryRevisions]) -> Result<()> {
    for repo_revs in repos {
        RefGlobs::compile(&repo_revs.revs)?;
    }
    Ok(())
}

pub struct RevisionExpander<'a> {
    refs: &'a dyn RefLister,
    multiple_revisions: bool,
}

impl<'a> RevisionExpander<'a> {
    /// `multiple_revisions` mirrors the site flag; when off only the first
    /// specifier of each repository is honored.
    pub fn new(refs: &'a dyn RefLister, multiple_revisions: bool) -> Self {
        Self { refs, multiple_revisions }
    }

    /// The specifiers that take part in expansion under the current flag.
    pub fn honored<'r>(&self, repo_revs: &'r RepositoryRevisions) -> &'r [RevisionSpecifier] {
        if self.multiple_revisions {
            &repo_revs.revs
        } else {
            &repo_revs.revs[..repo_revs.revs.len().min(1)]
        }
    }

    /// Expand one repository into search units for `backend`.
    ///
    /// Exact revisions come first in declaration order, followed by
    /// glob-selected refs in the order the ref service listed them.
    /// Duplicates are not removed. Zero glob matches is not an error.
    pub async fn expand(&self, repo_revs: &RepositoryRevisions, backend: Backend) -> std::result::Result<Vec<SearchUnit>, BackendError> {
        let specs = self.honored(repo_revs);
        let repo = &repo_revs.repo;

        let mut units = Vec::with_capacity(specs.len());
        for spec in specs {
            if let RevisionSpecifier::Exact(rev) = spec {
                let origin = if is_default_rev(rev) {
                    RevisionOrigin::DefaultBranch
                } else {
                    RevisionOrigin::Explicit
                };
                units.push(SearchUnit::new(repo.clone(), rev.clone(), origin, backend));
            }
        }

        // Globs were validated before dispatch; a failure here is a bug upstream.
        let globs = RefGlobs::compile(specs).map_err(|e| BackendError::Other(e.to_string()))?;
        if globs.is_empty() {
            return Ok(units);
        }

        let refs: Vec<GitRef> = self.refs.list_refs(repo).await?;
        let before = units.len();
        for git_ref in refs.iter().filter(|r| globs.matches(&r.name)) {
            units.push(SearchUnit::new(repo.clone(), git_ref.short_name(), RevisionOrigin::Glob, backend));
        }
        tracing::debug!(
            "expanded ref globs for {}: {} of {} refs selected",
            repo,
            units.len() - before,
            refs.len()
        );

        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepositoryIdentity;
    use crate::revision::parse_repository_revisions;
    use crate::test_utils::StaticRefs;

    fn repo_revs(spec: &str) -> RepositoryRevisions {
        let (name, revs) = parse_repository_revisions(spec).unwrap();
        RepositoryRevisions::new(RepositoryIdentity::new(1, name), revs)
    }

    fn revisions(units: &[SearchUnit]) -> Vec<&str> {
        units.iter().map(|u| u.revision.as_str()).collect()
    }

    #[test]
    fn test_ref_glob_normalization() {
        let g = RefGlob::compile("refs/heads/").unwrap();
        assert!(g.matches("refs/heads/main"));
        assert!(g.matches("refs/heads/feature/x"));
        assert!(!g.matches("refs/tags/v1"));
        assert!(!g.matches("refs/headsx/main"));

        let g = RefGlob::compile("heads/release-*").unwrap();
        assert!(g.matches("refs/heads/release-1.0"));
        assert!(!g.matches("refs/heads/main"));

        let g = RefGlob::compile("refs/heads/wip").unwrap();
        assert!(g.matches("refs/heads/wip"));
        assert!(g.matches("refs/heads/wip/a"));
        assert!(!g.matches("refs/heads/wipe"));
    }

    #[test]
    fn test_invalid_glob_rejected_up_front() {
        let bad = RepositoryRevisions::new(
            RepositoryIdentity::new(1, "foo"),
            vec![RevisionSpecifier::RefGlob("refs/heads/[".to_string())],
        );
        assert!(matches!(validate_ref_globs(&[bad]), Err(crate::Error::InvalidRefGlob(_))));
    }

    #[tokio::test]
    async fn test_exact_and_glob_mixed() {
        let refs = StaticRefs::new(["refs/heads/branch3", "refs/heads/branch4", "refs/tags/v1"]);
        let expander = RevisionExpander::new(&refs, true);

        let units = expander.expand(&repo_revs("foo@master:*refs/heads/"), Backend::Unindexed).await.unwrap();
        assert_eq!(revisions(&units), vec!["master", "branch3", "branch4"]);
        assert_eq!(units[0].origin, RevisionOrigin::Explicit);
        assert_eq!(units[1].origin, RevisionOrigin::Glob);
        assert_eq!(refs.calls(), 1);
    }

    #[tokio::test]
    async fn test_exact_only_never_lists_refs() {
        let refs = StaticRefs::new(["refs/heads/main"]);
        let expander = RevisionExpander::new(&refs, true);

        let units = expander.expand(&repo_revs("foo@a:b"), Backend::Unindexed).await.unwrap();
        assert_eq!(revisions(&units), vec!["a", "b"]);
        assert_eq!(refs.calls(), 0);

        let units = expander.expand(&repo_revs("foo"), Backend::Indexed).await.unwrap();
        assert_eq!(units[0].origin, RevisionOrigin::DefaultBranch);
        assert_eq!(units[0].backend, Backend::Indexed);
    }

    #[tokio::test]
    async fn test_exclusions_and_zero_matches() {
        let refs = StaticRefs::new(["refs/heads/main", "refs/heads/wip", "refs/heads/wip/x"]);
        let expander = RevisionExpander::new(&refs, true);

        let units = expander.expand(&repo_revs("foo@*refs/heads/:*!refs/heads/wip"), Backend::Unindexed).await.unwrap();
        assert_eq!(revisions(&units), vec!["main"]);

        let units = expander.expand(&repo_revs("foo@*refs/tags/"), Backend::Unindexed).await.unwrap();
        assert!(units.is_empty());

        let units = expander.expand(&repo_revs("foo@*!refs/heads/wip"), Backend::Unindexed).await.unwrap();
        assert!(units.is_empty());
    }

    #[tokio::test]
    async fn test_single_revision_mode_honors_first_only() {
        let refs = StaticRefs::new(["refs/heads/branch3"]);
        let expander = RevisionExpander::new(&refs, false);

        let units = expander.expand(&repo_revs("foo@master:mybranch:*refs/heads/"), Backend::Unindexed).await.unwrap();
        assert_eq!(revisions(&units), vec!["master"]);
        assert_eq!(refs.calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicates_pass_through() {
        let refs = StaticRefs::new(["refs/heads/master"]);
        let expander = RevisionExpander::new(&refs, true);

        let units = expander.expand(&repo_revs("foo@master:*refs/heads/"), Backend::Unindexed).await.unwrap();
        assert_eq!(revisions(&units), vec!["master", "master"]);
    }

    #[tokio::test]
    async fn test_ref_listing_error_propagates() {
        let refs = StaticRefs::failing(BackendError::CloneInProgress { repo: "foo".into() });
        let expander = RevisionExpander::new(&refs, true);

        let err = expander.expand(&repo_revs("foo@*refs/heads/"), Backend::Unindexed).await.unwrap_err();
        assert_eq!(err, BackendError::CloneInProgress { repo: "foo".into() });
    }
}
