//! Collaborator boundary
//!
//! The dispatcher never talks to a network directly. Everything it needs from
//! the outside world comes through these traits:
//! - `RefLister`: ref names for glob expansion
//! - `IndexedSearcher`: batched search against the pre-built index
//! - `UnindexedSearcher`: one repository revision at a time
//! - `RepoCatalog`: repository name to identity
//! - `IndexCoverage`: which backend serves a repository

pub mod coverage;

pub use coverage::{IndexCoverage, IndexedRepos, NoIndex};

use crate::pattern::PatternSpec;
use crate::repo::RepositoryIdentity;
use crate::results::{FileMatch, SoftFailure};
use crate::revision::SearchUnit;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which backend a unit is dispatched to. Decided once, carried on the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Indexed,
    Unindexed,
}

/// Failures reported by collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("repository {repo} is still being cloned")]
    CloneInProgress { repo: String },

    #[error("repository not found: {repo}")]
    RepoNotFound { repo: String },

    #[error("revision {rev:?} not found in repository {repo}")]
    RevisionNotFound { repo: String, rev: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("temporary backend failure: {0}")]
    Temporary(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// The soft bucket this error belongs in, if it is not fatal.
    ///
    /// `RevisionNotFound` and `Other` return `None`; whether a missing
    /// revision is fatal depends on where the revision came from.
    pub fn soft_failure(&self) -> Option<SoftFailure> {
        match self {
            BackendError::CloneInProgress { .. } => Some(SoftFailure::Cloning),
            BackendError::RepoNotFound { .. } => Some(SoftFailure::Missing),
            BackendError::DeadlineExceeded | BackendError::Temporary(_) => Some(SoftFailure::TimedOut),
            BackendError::RevisionNotFound { .. } | BackendError::Other(_) => None,
        }
    }

    pub fn is_revision_not_found(&self) -> bool {
        matches!(self, BackendError::RevisionNotFound { .. })
    }
}

/// A ref as listed by the version-control service, e.g. `refs/heads/main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitRef {
    pub name: String,
}

impl GitRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// `refs/heads/x` and `refs/tags/x` shorten to `x`; other refs stay whole.
    pub fn short_name(&self) -> &str {
        self.name
            .strip_prefix("refs/heads/")
            .or_else(|| self.name.strip_prefix("refs/tags/"))
            .unwrap_or(&self.name)
    }
}

/// Answer from either search backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub matches: Vec<FileMatch>,
    /// The backend's own result cap was reached.
    pub limit_hit: bool,
}

impl SearchResponse {
    pub fn new(matches: Vec<FileMatch>, limit_hit: bool) -> Self {
        Self { matches, limit_hit }
    }
}

#[async_trait]
pub trait RefLister: Send + Sync {
    async fn list_refs(&self, repo: &RepositoryIdentity) -> Result<Vec<GitRef>, BackendError>;
}

/// The pre-built index service. Takes every indexed unit in one request.
#[async_trait]
pub trait IndexedSearcher: Send + Sync {
    async fn search(&self, units: &[SearchUnit], pattern: &PatternSpec) -> Result<SearchResponse, BackendError>;
}

/// The networked per-repository searcher.
#[async_trait]
pub trait UnindexedSearcher: Send + Sync {
    async fn search(&self, unit: &SearchUnit, pattern: &PatternSpec) -> Result<SearchResponse, BackendError>;
}

#[async_trait]
pub trait RepoCatalog: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<RepositoryIdentity, BackendError>;
}
