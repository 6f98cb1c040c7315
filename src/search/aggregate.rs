//! Concurrent dispatch and the single merge point
//!
//! Every piece of work (ref expansion, one unindexed unit, the indexed batch)
//! runs as its own task on a `JoinSet`, gated by a semaphore. The dispatch
//! loop is the only consumer of completions, so it is also the only writer
//! of the accumulated results, the classification sets and the output
//! channel. Completion order is whatever the backends produce.

use crate::backend::{Backend, BackendError, IndexedSearcher, RefLister, UnindexedSearcher};
use crate::expand::RevisionExpander;
use crate::pattern::PatternSpec;
use crate::repo::RepositoryIdentity;
use crate::results::{flatten_file_matches, FileMatch, ResultBatch, SearchCommon, SoftFailure};
use crate::revision::{RepositoryRevisions, SearchUnit};
use crate::search::indexed::{search_indexed, IndexedOutcome};
use crate::search::unit::{run_unit, PerRepoSearcher, UnitOutcome};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Everything a job needs, shared read-only by all tasks of one call.
pub(crate) struct JobContext {
    pub refs: Arc<dyn RefLister>,
    pub unindexed: Arc<dyn UnindexedSearcher>,
    pub indexed: Option<Arc<dyn IndexedSearcher>>,
    pub pattern: PatternSpec,
    pub fetch_timeout: Duration,
    pub multiple_revisions: bool,
}

pub(crate) enum Job {
    Expand { repo_revs: RepositoryRevisions, backend: Backend },
    Unit(SearchUnit),
    Indexed(Vec<SearchUnit>),
}

pub(crate) enum Completion {
    Expanded { backend: Backend, units: Vec<SearchUnit> },
    ExpandFailed { backend: Backend, repo: RepositoryIdentity, failure: Option<SoftFailure> },
    Unit { unit: SearchUnit, outcome: UnitOutcome },
    Indexed { units: Vec<SearchUnit>, outcome: IndexedOutcome },
    Canceled,
}

impl Job {
    fn repos(&self) -> Vec<RepositoryIdentity> {
        match self {
            Job::Expand { repo_revs, .. } => vec![repo_revs.repo.clone()],
            Job::Unit(unit) => vec![unit.repo.clone()],
            Job::Indexed(units) => {
                let mut repos: Vec<_> = units.iter().map(|u| u.repo.clone()).collect();
                repos.sort();
                repos.dedup();
                repos
            }
        }
    }

    async fn run(self, ctx: &JobContext) -> Result<Completion> {
        match self {
            Job::Expand { repo_revs, backend } => {
                let expander = RevisionExpander::new(ctx.refs.as_ref(), ctx.multiple_revisions);
                let expanded = match tokio::time::timeout(ctx.fetch_timeout, expander.expand(&repo_revs, backend)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::DeadlineExceeded),
                };
                match expanded {
                    Ok(units) => Ok(Completion::Expanded { backend, units }),
                    Err(e) => {
                        let repo = repo_revs.repo;
                        if let Some(failure) = e.soft_failure() {
                            tracing::warn!("expanding revisions of {} classified as {}: {}", repo, failure, e);
                            Ok(Completion::ExpandFailed { backend, repo, failure: Some(failure) })
                        } else if e.is_revision_not_found() {
                            tracing::warn!("ref listing for {} reported a missing revision: {}", repo, e);
                            Ok(Completion::ExpandFailed { backend, repo, failure: None })
                        } else {
                            Err(Error::Backend {
                                repo: repo.name,
                                message: e.to_string(),
                            })
                        }
                    }
                }
            }
            Job::Unit(unit) => {
                let searcher = PerRepoSearcher::new(ctx.unindexed.as_ref(), ctx.fetch_timeout);
                let outcome = run_unit(&searcher, &unit, &ctx.pattern).await?;
                Ok(Completion::Unit { unit, outcome })
            }
            Job::Indexed(units) => {
                let Some(index) = ctx.indexed.as_ref() else {
                    return Err(Error::Backend {
                        repo: "<index>".to_string(),
                        message: "indexed units dispatched without an index backend".to_string(),
                    });
                };
                let outcome = search_indexed(index.as_ref(), &units, &ctx.pattern, ctx.fetch_timeout).await?;
                Ok(Completion::Indexed { units, outcome })
            }
        }
    }
}

/// Why a merge stopped waiting on a stalled stream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Canceled,
    DeadlineExpired,
}

/// Resolves at `deadline`, or never.
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// The merge point: accumulated batches, classification and the optional stream.
pub struct Aggregator<'s> {
    batches: Vec<ResultBatch>,
    common: SearchCommon,
    stream: Option<&'s mpsc::Sender<ResultBatch>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl<'s> Aggregator<'s> {
    pub fn new(stream: Option<&'s mpsc::Sender<ResultBatch>>) -> Self {
        Self {
            batches: Vec::new(),
            common: SearchCommon::new(),
            stream,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Stop waiting on the stream when `cancel` fires or `deadline` passes.
    pub fn interruptible(mut self, cancel: &CancellationToken, deadline: Option<Instant>) -> Self {
        self.cancel = cancel.clone();
        self.deadline = deadline;
        self
    }

    pub fn common(&self) -> &SearchCommon {
        &self.common
    }

    pub fn match_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Merge one unit's batch and push it to the stream, if any.
    ///
    /// Empty batches count the repository as searched but are not streamed.
    /// The batch is merged even when the send is interrupted; streaming stops
    /// from then on.
    pub async fn merge(
        &mut self,
        repo: &RepositoryIdentity,
        batch: ResultBatch,
        limit_hit: bool,
    ) -> std::result::Result<(), Interrupted> {
        self.common.limit_hit |= limit_hit;
        self.common.searched.insert(repo.clone());
        if batch.is_empty() {
            return Ok(());
        }
        let sent = self.emit(&batch).await;
        self.batches.push(batch);
        sent
    }

    /// Count every unit of an answered index request as searched by the index.
    pub fn record_indexed(&mut self, units: &[SearchUnit], limit_hit: bool) {
        self.common.limit_hit |= limit_hit;
        for unit in units {
            self.common.searched.insert(unit.repo.clone());
            self.common.indexed.insert(unit.repo.clone());
        }
    }

    pub fn record_failure(&mut self, repo: RepositoryIdentity, failure: SoftFailure) {
        self.common.record(repo, failure);
    }

    pub fn record_skipped(&mut self, repo: RepositoryIdentity) {
        self.common.searched.insert(repo);
    }

    async fn emit(&mut self, batch: &ResultBatch) -> std::result::Result<(), Interrupted> {
        let Some(tx) = self.stream else {
            return Ok(());
        };
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Canceled),
            _ = expire(self.deadline) => Err(Interrupted::DeadlineExpired),
            sent = tx.send(batch.clone()) => Ok(sent),
        };
        match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                tracing::warn!("stream receiver dropped, continuing without streaming");
                self.stream = None;
                Ok(())
            }
            Err(stop) => {
                tracing::warn!("stream consumer stalled, giving up on streaming ({:?})", stop);
                self.stream = None;
                Err(stop)
            }
        }
    }

    /// Merged matches capped at `limit`, plus the classification.
    pub fn finish(mut self, limit: usize) -> (Vec<FileMatch>, SearchCommon) {
        let (matches, truncated) = flatten_file_matches(self.batches, limit);
        self.common.limit_hit |= truncated;
        (matches, self.common)
    }
}

struct Scheduler {
    tasks: JoinSet<Result<Completion>>,
    pending: HashMap<task::Id, Vec<RepositoryIdentity>>,
    ctx: Arc<JobContext>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
}

impl Scheduler {
    fn spawn(&mut self, job: Job) {
        let repos = job.repos();
        let ctx = Arc::clone(&self.ctx);
        let permits = Arc::clone(&self.permits);
        let token = self.token.clone();

        let handle = self.tasks.spawn(
            async move {
                let _permit = tokio::select! {
                    _ = token.cancelled() => return Ok(Completion::Canceled),
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Ok(Completion::Canceled),
                    },
                };
                // Already-issued calls run to completion; their results are discarded.
                job.run(&ctx).await
            }
            .in_current_span(),
        );
        self.pending.insert(handle.id(), repos);
    }

    /// Classify every repository whose work is still outstanding as timed out.
    fn expire_outstanding(&self, aggregator: &mut Aggregator<'_>) {
        let outstanding: Vec<RepositoryIdentity> = self.pending.values().flatten().cloned().collect();
        tracing::warn!("search deadline reached with {} repositories outstanding", outstanding.len());
        for repo in outstanding {
            aggregator.record_failure(repo, SoftFailure::TimedOut);
        }
    }

    /// Outcome of the call once a merge was interrupted.
    fn interrupted(&self, stop: Interrupted, aggregator: &mut Aggregator<'_>) -> Result<()> {
        match stop {
            Interrupted::Canceled => Err(Error::Canceled),
            Interrupted::DeadlineExpired => {
                self.expire_outstanding(aggregator);
                Ok(())
            }
        }
    }

    /// Stop new work; detached tasks finish in the background unobserved.
    fn shutdown(mut self) {
        self.token.cancel();
        self.tasks.detach_all();
    }
}

/// Drive `jobs` to completion, merging into `aggregator`.
///
/// - `cancel` firing aborts with `Error::Canceled`
/// - `deadline` passing classifies every outstanding repository as timed
///   out and returns what has been merged so far
/// - the first fatal job error aborts, cancelling pending work
pub(crate) async fn dispatch(
    jobs: Vec<Job>,
    ctx: Arc<JobContext>,
    concurrency: usize,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    aggregator: &mut Aggregator<'_>,
) -> Result<()> {
    let mut indexed_expansions = jobs
        .iter()
        .filter(|j| matches!(j, Job::Expand { backend: Backend::Indexed, .. }))
        .count();
    let mut indexed_units: Vec<SearchUnit> = Vec::new();

    let mut scheduler = Scheduler {
        tasks: JoinSet::new(),
        pending: HashMap::new(),
        ctx,
        permits: Arc::new(Semaphore::new(concurrency.max(1))),
        token: cancel.child_token(),
    };
    for job in jobs {
        scheduler.spawn(job);
    }

    let expired = expire(deadline);
    tokio::pin!(expired);

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(Error::Canceled),
            _ = &mut expired => {
                scheduler.expire_outstanding(aggregator);
                break Ok(());
            }
            next = scheduler.tasks.join_next_with_id() => {
                let completion = match next {
                    None => break Ok(()),
                    Some(Ok((id, completion))) => {
                        scheduler.pending.remove(&id);
                        completion
                    }
                    Some(Err(join_err)) => {
                        scheduler.pending.remove(&join_err.id());
                        break Err(Error::Task(join_err));
                    }
                };

                match completion {
                    Ok(Completion::Expanded { backend: Backend::Unindexed, units }) => {
                        for unit in units {
                            scheduler.spawn(Job::Unit(unit));
                        }
                    }
                    Ok(Completion::Expanded { backend: Backend::Indexed, units }) => {
                        indexed_units.extend(units);
                        indexed_expansions -= 1;
                    }
                    Ok(Completion::ExpandFailed { backend, repo, failure }) => {
                        if backend == Backend::Indexed {
                            indexed_expansions -= 1;
                        }
                        match failure {
                            Some(failure) => aggregator.record_failure(repo, failure),
                            None => aggregator.record_skipped(repo),
                        }
                    }
                    Ok(Completion::Unit { unit, outcome }) => match outcome {
                        UnitOutcome::Searched { matches, limit_hit } => {
                            if let Err(stop) = aggregator.merge(&unit.repo, matches, limit_hit).await {
                                break scheduler.interrupted(stop, aggregator);
                            }
                        }
                        UnitOutcome::Skipped => aggregator.record_skipped(unit.repo),
                        UnitOutcome::Failed(failure) => aggregator.record_failure(unit.repo, failure),
                    },
                    Ok(Completion::Indexed { units, outcome }) => match outcome {
                        IndexedOutcome::Searched { batches, limit_hit } => {
                            aggregator.record_indexed(&units, limit_hit);
                            let mut stopped = None;
                            for batch in batches {
                                if let Some(first) = batch.first() {
                                    let repo = first.repo.clone();
                                    if let Err(stop) = aggregator.merge(&repo, batch, false).await {
                                        stopped.get_or_insert(stop);
                                    }
                                }
                            }
                            if let Some(stop) = stopped {
                                break scheduler.interrupted(stop, aggregator);
                            }
                        }
                        IndexedOutcome::Failed(failure) => {
                            for unit in units {
                                aggregator.record_failure(unit.repo, failure);
                            }
                        }
                        IndexedOutcome::EmptyRepository(repo) => {
                            let rest: Vec<SearchUnit> = units.into_iter().filter(|u| u.repo != repo).collect();
                            aggregator.record_skipped(repo);
                            if !rest.is_empty() {
                                scheduler.spawn(Job::Indexed(rest));
                            }
                        }
                    },
                    Ok(Completion::Canceled) => {}
                    Err(e) => {
                        tracing::error!("aborting search: {}", e);
                        break Err(e);
                    }
                }

                if indexed_expansions == 0 && !indexed_units.is_empty() {
                    scheduler.spawn(Job::Indexed(std::mem::take(&mut indexed_units)));
                }
            }
        }
    };

    scheduler.shutdown();
    result
}
