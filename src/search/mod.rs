//! Search dispatch
//!
//! `Dispatcher::search_files_in_repos` is the one entry point:
//! 1. wait for the repository set
//! 2. tag each repository with its backend
//! 3. cap the unindexed fan-out
//! 4. expand revisions, probe, and search every unit concurrently
//! 5. merge (and optionally stream) results as units complete

pub(crate) mod aggregate;
pub mod indexed;
pub mod probe;
pub mod promise;
pub mod unit;

pub use aggregate::{Aggregator, Interrupted};
pub use promise::RepoPromise;
pub use unit::{classify, PerRepoSearcher, UnitOutcome};

use crate::backend::{Backend, IndexCoverage, IndexedSearcher, NoIndex, RefLister, UnindexedSearcher};
use crate::config::ConfigSource;
use crate::expand::validate_ref_globs;
use crate::limit::limit_unindexed_repos;
use crate::pattern::PatternSpec;
use crate::repo::RepositoryIdentity;
use crate::results::{FileMatch, ResultBatch, SearchCommon};
use crate::revision::RepositoryRevisions;
use crate::Result;
use aggregate::{dispatch, Job, JobContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Arguments of one search call.
#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub pattern: PatternSpec,
    pub repos: Arc<RepoPromise>,
    /// Caller-owned cancellation; firing it aborts the call with `Canceled`.
    pub cancel: CancellationToken,
    /// Overall budget. Repositories still outstanding when it runs out are
    /// reported as timed out and the partial result is returned.
    pub timeout: Option<Duration>,
}

impl SearchArgs {
    pub fn new(pattern: PatternSpec, repos: Arc<RepoPromise>) -> Self {
        Self {
            pattern,
            repos,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Successful result of a search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub matches: Vec<FileMatch>,
    pub common: SearchCommon,
    /// Repositories dropped by the unindexed fan-out cap; never searched.
    pub limited: Vec<RepositoryIdentity>,
}

/// Routes searches to the index service and the unindexed searcher.
pub struct Dispatcher {
    config: Arc<dyn ConfigSource>,
    refs: Arc<dyn RefLister>,
    unindexed: Arc<dyn UnindexedSearcher>,
    indexed: Option<Arc<dyn IndexedSearcher>>,
    coverage: Arc<dyn IndexCoverage>,
}

impl Dispatcher {
    /// A dispatcher with no index: every repository uses the unindexed searcher.
    pub fn new(
        config: Arc<dyn ConfigSource>,
        refs: Arc<dyn RefLister>,
        unindexed: Arc<dyn UnindexedSearcher>,
    ) -> Self {
        Self {
            config,
            refs,
            unindexed,
            indexed: None,
            coverage: Arc::new(NoIndex),
        }
    }

    /// Route repositories the coverage reports as indexed to `indexed`.
    pub fn with_index(mut self, indexed: Arc<dyn IndexedSearcher>, coverage: Arc<dyn IndexCoverage>) -> Self {
        self.indexed = Some(indexed);
        self.coverage = coverage;
        self
    }

    fn backend_for(&self, repo_revs: &RepositoryRevisions) -> Backend {
        if self.indexed.is_some() {
            self.coverage.backend_for(repo_revs)
        } else {
            Backend::Unindexed
        }
    }

    /// Search every repository revision in `args.repos` for `args.pattern`.
    ///
    /// When `stream` is given, each non-empty batch is sent on it as soon as
    /// it is merged, in completion order. The channel is only borrowed: the
    /// caller closes it after this returns. On error nothing is returned
    /// beyond what was already streamed.
    pub async fn search_files_in_repos(
        &self,
        args: &SearchArgs,
        stream: Option<&mpsc::Sender<ResultBatch>>,
    ) -> Result<SearchOutcome> {
        let span = tracing::info_span!("search_files_in_repos", pattern = %args.pattern.pattern);
        self.search_inner(args, stream).instrument(span).await
    }

    async fn search_inner(&self, args: &SearchArgs, stream: Option<&mpsc::Sender<ResultBatch>>) -> Result<SearchOutcome> {
        let started = Instant::now();
        let deadline = args.timeout.map(|t| started + t);
        let config = self.config.snapshot();
        args.pattern.validate()?;

        let repos = args.repos.get(&args.cancel).await?;
        validate_ref_globs(&repos)?;

        let mut indexed = Vec::new();
        let mut unindexed = Vec::new();
        for repo_revs in repos.iter() {
            match self.backend_for(repo_revs) {
                Backend::Indexed => indexed.push(repo_revs.clone()),
                Backend::Unindexed => unindexed.push(repo_revs.clone()),
            }
        }
        let (unindexed, limited) = limit_unindexed_repos(unindexed, config.max_unindexed_repos);

        tracing::debug!(
            "dispatching {} indexed and {} unindexed repositories ({} limited)",
            indexed.len(),
            unindexed.len(),
            limited.len()
        );

        let jobs: Vec<Job> = indexed
            .into_iter()
            .map(|repo_revs| Job::Expand { repo_revs, backend: Backend::Indexed })
            .chain(
                unindexed
                    .into_iter()
                    .map(|repo_revs| Job::Expand { repo_revs, backend: Backend::Unindexed }),
            )
            .collect();

        let ctx = Arc::new(JobContext {
            refs: Arc::clone(&self.refs),
            unindexed: Arc::clone(&self.unindexed),
            indexed: self.indexed.clone(),
            pattern: args.pattern.clone(),
            fetch_timeout: args.pattern.fetch_timeout.min(config.max_fetch_timeout()),
            multiple_revisions: config.search_multiple_revisions_per_repository,
        });

        let mut aggregator = Aggregator::new(stream).interruptible(&args.cancel, deadline);
        dispatch(jobs, ctx, config.concurrency(), &args.cancel, deadline, &mut aggregator).await?;

        let (matches, common) = aggregator.finish(args.pattern.file_match_limit);
        tracing::info!(
            "search finished in {:?}: {} matches from {} repositories ({} cloning, {} missing, {} timed out, {} limited)",
            started.elapsed(),
            matches.len(),
            common.searched.len(),
            common.cloning.len(),
            common.missing.len(),
            common.timedout.len(),
            limited.len()
        );

        Ok(SearchOutcome { matches, common, limited })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IndexedRepos;
    use crate::config::DispatchConfig;
    use crate::test_utils::{make_repository_revisions, repo, repo_id_for, single_match, FnIndex, FnSearcher, StaticRefs};
    use crate::RepoId;

    fn dispatcher(config: DispatchConfig, searcher: &FnSearcher) -> Dispatcher {
        Dispatcher::new(Arc::new(config), Arc::new(StaticRefs::empty()), Arc::new(searcher.clone()))
    }

    #[tokio::test]
    async fn test_fetch_timeout_clamped_by_config() {
        let searcher = FnSearcher::new(|u, _| Ok(single_match(u))).with_delay("slow", Duration::from_secs(5));
        let config = DispatchConfig {
            max_fetch_timeout_ms: 50,
            ..DispatchConfig::default()
        };
        let d = dispatcher(config, &searcher);
        let pattern = PatternSpec::new("foo").with_fetch_timeout(Duration::from_secs(30));
        let args = SearchArgs::new(pattern, Arc::new(RepoPromise::resolved(make_repository_revisions(&["fast", "slow"]))));

        let out = d.search_files_in_repos(&args, None).await.unwrap();
        assert!(out.common.timedout.contains(&repo("slow")));
        assert_eq!(out.matches.len(), 1);
    }

    #[test]
    fn test_coverage_ignored_without_index_backend() {
        let searcher = FnSearcher::new(|u, _| Ok(single_match(u)));
        let covered = make_repository_revisions(&["a"]).remove(0);

        let d = dispatcher(DispatchConfig::default(), &searcher);
        assert_eq!(d.backend_for(&covered), Backend::Unindexed);

        let d = dispatcher(DispatchConfig::default(), &searcher).with_index(
            Arc::new(FnIndex::single_match_each()),
            Arc::new(IndexedRepos::new([RepoId(repo_id_for("a"))])),
        );
        assert_eq!(d.backend_for(&covered), Backend::Indexed);
    }

    #[tokio::test]
    async fn test_empty_repo_set() {
        let searcher = FnSearcher::new(|u, _| Ok(single_match(u)));
        let d = dispatcher(DispatchConfig::default(), &searcher);
        let args = SearchArgs::new(PatternSpec::new("foo"), Arc::new(RepoPromise::resolved(Vec::new())));

        let out = d.search_files_in_repos(&args, None).await.unwrap();
        assert_eq!(out, SearchOutcome::default());
        assert!(searcher.calls().is_empty());
    }
}
