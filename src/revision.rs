//! Revision specifiers and the units of work derived from them
//!
//! Textual form used by callers and tests:
//!
//! - `repo` - default branch
//! - `repo@main` - one exact revision
//! - `repo@main:v1.2:*refs/heads/release/` - exact revisions plus a ref glob
//! - `repo@*refs/heads/:*!refs/heads/wip` - all branches except `wip`

use crate::backend::Backend;
use crate::repo::RepositoryIdentity;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One declared revision: an exact name or a glob over a ref namespace, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RevisionSpecifier {
    /// Branch, tag or commit-ish. Empty means the default branch.
    Exact(String),
    /// Refs matching this glob become revisions.
    RefGlob(String),
    /// Refs matching this glob are removed from the glob-expanded set.
    ExcludeRefGlob(String),
}

impl RevisionSpecifier {
    pub fn exact(rev: impl Into<String>) -> Self {
        RevisionSpecifier::Exact(rev.into())
    }

    pub fn default_branch() -> Self {
        RevisionSpecifier::Exact(String::new())
    }

    pub fn is_glob(&self) -> bool {
        !matches!(self, RevisionSpecifier::Exact(_))
    }

    /// Default-branch specifiers are `""` and `HEAD`.
    pub fn is_default_branch(&self) -> bool {
        matches!(self, RevisionSpecifier::Exact(rev) if is_default_rev(rev))
    }

    /// Parse one `:`-separated segment of a revision list.
    pub fn parse(segment: &str) -> Result<Self> {
        if let Some(glob) = segment.strip_prefix("*!") {
            if glob.is_empty() {
                return Err(Error::InvalidRevision(format!("empty exclusion glob in {:?}", segment)));
            }
            Ok(RevisionSpecifier::ExcludeRefGlob(glob.to_string()))
        } else if let Some(glob) = segment.strip_prefix('*') {
            if glob.is_empty() {
                return Err(Error::InvalidRevision(format!("empty ref glob in {:?}", segment)));
            }
            Ok(RevisionSpecifier::RefGlob(glob.to_string()))
        } else {
            Ok(RevisionSpecifier::Exact(segment.to_string()))
        }
    }
}

impl fmt::Display for RevisionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSpecifier::Exact(rev) => write!(f, "{}", rev),
            RevisionSpecifier::RefGlob(glob) => write!(f, "*{}", glob),
            RevisionSpecifier::ExcludeRefGlob(glob) => write!(f, "*!{}", glob),
        }
    }
}

pub(crate) fn is_default_rev(rev: &str) -> bool {
    rev.is_empty() || rev == "HEAD"
}

/// Split `repo@rev1:rev2` into the repository name and its specifiers.
///
/// A spec without `@` (or with nothing after it) yields the default branch.
pub fn parse_repository_revisions(spec: &str) -> Result<(String, Vec<RevisionSpecifier>)> {
    let (name, revs) = match spec.split_once('@') {
        Some((name, revs)) => (name, revs),
        None => (spec, ""),
    };
    if name.is_empty() {
        return Err(Error::InvalidRevision(format!("missing repository name in {:?}", spec)));
    }

    let mut specifiers = Vec::new();
    for segment in revs.split(':').filter(|s| !s.is_empty()) {
        specifiers.push(RevisionSpecifier::parse(segment)?);
    }
    if specifiers.is_empty() {
        specifiers.push(RevisionSpecifier::default_branch());
    }
    Ok((name.to_string(), specifiers))
}

/// A repository with the ordered revisions requested for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRevisions {
    pub repo: RepositoryIdentity,
    pub revs: Vec<RevisionSpecifier>,
}

impl RepositoryRevisions {
    /// An empty revision list is treated as the default branch.
    pub fn new(repo: RepositoryIdentity, revs: Vec<RevisionSpecifier>) -> Self {
        let revs = if revs.is_empty() {
            vec![RevisionSpecifier::default_branch()]
        } else {
            revs
        };
        Self { repo, revs }
    }

    pub fn default_branch(repo: RepositoryIdentity) -> Self {
        Self::new(repo, Vec::new())
    }

    /// True when every specifier targets the default branch.
    pub fn is_default_only(&self) -> bool {
        self.revs.iter().all(RevisionSpecifier::is_default_branch)
    }

    pub fn has_globs(&self) -> bool {
        self.revs.iter().any(RevisionSpecifier::is_glob)
    }
}

impl fmt::Display for RepositoryRevisions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revs: Vec<String> = self.revs.iter().map(|r| r.to_string()).collect();
        write!(f, "{}@{}", self.repo, revs.join(":"))
    }
}

/// Where a unit's concrete revision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOrigin {
    /// Named by the caller; a missing revision is the caller's mistake.
    Explicit,
    /// The repository's default branch.
    DefaultBranch,
    /// Produced by expanding a ref glob.
    Glob,
}

/// The atomic dispatch item: one repository at one concrete revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchUnit {
    pub repo: RepositoryIdentity,
    pub revision: String,
    pub origin: RevisionOrigin,
    pub backend: Backend,
}

impl SearchUnit {
    pub fn new(repo: RepositoryIdentity, revision: impl Into<String>, origin: RevisionOrigin, backend: Backend) -> Self {
        Self {
            repo,
            revision: revision.into(),
            origin,
            backend,
        }
    }
}

impl fmt::Display for SearchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision.is_empty() {
            write!(f, "{}", self.repo)
        } else {
            write!(f, "{}@{}", self.repo, self.revision)
        }
    }
}
