//! # searchdispatch - Dispatch core for distributed code search
//!
//! Fans a text search out across many repositories and revisions.
//!
//! searchdispatch provides:
//! - Revision expansion (exact names and ref globs) per repository
//! - A hard cap on unindexed fan-out, applied in input order
//! - Per-repository failure classification (cloning, missing, timed out)
//! - A cheap preflight probe for "repository must contain file" filters
//! - Concurrent dispatch with a single merge point and optional streaming
//!
//! The backends themselves (index service, unindexed searcher, ref listing,
//! repository catalog) are collaborators behind the traits in [`backend`].

pub mod config;
pub mod logging;
pub mod repo;
pub mod revision;
pub mod pattern;
pub mod results;
pub mod backend;
pub mod expand;
pub mod limit;
pub mod catalog;
pub mod search;
pub mod test_utils;

// Re-exports for convenient access
pub use backend::{Backend, BackendError};
pub use config::{ConfigSource, DispatchConfig};
pub use pattern::PatternSpec;
pub use repo::{RepoId, RepositoryIdentity};
pub use results::{FileMatch, LineMatch, ResultBatch, SearchCommon};
pub use revision::{RepositoryRevisions, RevisionSpecifier, SearchUnit};
pub use search::{Dispatcher, RepoPromise, SearchArgs, SearchOutcome};

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Call-level errors. Anything surfaced here aborts the whole search.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("revision {rev:?} not found in repository {repo}")]
    RevisionNotFound { repo: String, rev: String },

    #[error("backend error for {repo}: {message}")]
    Backend { repo: String, message: String },

    #[error("Invalid revision specifier: {0}")]
    InvalidRevision(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid ref glob: {0}")]
    InvalidRefGlob(#[from] glob::PatternError),

    #[error("search canceled")]
    Canceled,

    #[error("search task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// True when the error is a caller-named revision that does not exist.
    pub fn is_revision_not_found(&self) -> bool {
        matches!(self, Error::RevisionNotFound { .. })
    }
}
