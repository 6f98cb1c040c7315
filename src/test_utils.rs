//! In-memory collaborators for tests and local experiments.
//!
//! Each fake records what it was asked so tests can assert on dispatch
//! behavior, not just on results.

use crate::backend::{
    BackendError, GitRef, IndexedSearcher, RefLister, RepoCatalog, SearchResponse, UnindexedSearcher,
};
use crate::pattern::PatternSpec;
use crate::repo::RepositoryIdentity;
use crate::results::FileMatch;
use crate::revision::{RepositoryRevisions, SearchUnit, parse_repository_revisions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deterministic id for a repository name.
pub fn repo_id_for(name: &str) -> u32 {
    name.bytes()
        .fold(2166136261u32, |acc, b| (acc ^ b as u32).wrapping_mul(16777619))
        .max(1)
}

pub fn repo(name: &str) -> RepositoryIdentity {
    RepositoryIdentity::new(repo_id_for(name), name)
}

/// Build `RepositoryRevisions` from `repo@rev:rev` specs; panics on bad input.
pub fn make_repository_revisions(specs: &[&str]) -> Vec<RepositoryRevisions> {
    specs
        .iter()
        .map(|spec| {
            let (name, revs) = parse_repository_revisions(spec).expect("valid repository spec");
            RepositoryRevisions::new(repo(&name), revs)
        })
        .collect()
}

/// One `main.go` match for the unit, the way most fixtures answer.
pub fn single_match(unit: &SearchUnit) -> SearchResponse {
    SearchResponse::new(vec![FileMatch::new(unit.repo.clone(), unit.revision.clone(), "main.go")], false)
}

/// Ref lister serving the same refs for every repository.
pub struct StaticRefs {
    refs: Result<Vec<GitRef>, BackendError>,
    calls: AtomicUsize,
}

impl StaticRefs {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            refs: Ok(names.into_iter().map(GitRef::new).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A lister with no refs at all.
    pub fn empty() -> Self {
        Self::new(Vec::<&str>::new())
    }

    pub fn failing(err: BackendError) -> Self {
        Self {
            refs: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefLister for StaticRefs {
    async fn list_refs(&self, _repo: &RepositoryIdentity) -> Result<Vec<GitRef>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.refs.clone()
    }
}

/// Catalog knowing a fixed set of names.
pub struct StaticCatalog {
    known: HashMap<String, RepositoryIdentity>,
}

impl StaticCatalog {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            known: names.into_iter().map(|n| (n.to_string(), repo(n))).collect(),
        }
    }
}

#[async_trait]
impl RepoCatalog for StaticCatalog {
    async fn resolve(&self, name: &str) -> Result<RepositoryIdentity, BackendError> {
        self.known
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::RepoNotFound { repo: name.to_string() })
    }
}

type UnitFn = dyn Fn(&SearchUnit, &PatternSpec) -> Result<SearchResponse, BackendError> + Send + Sync;

/// Unindexed searcher answering through a closure, with optional per-repo latency.
#[derive(Clone)]
pub struct FnSearcher {
    f: Arc<UnitFn>,
    delays: Arc<HashMap<String, Duration>>,
    calls: Arc<Mutex<Vec<(SearchUnit, PatternSpec)>>>,
}

impl FnSearcher {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&SearchUnit, &PatternSpec) -> Result<SearchResponse, BackendError> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            delays: Arc::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delay every answer for `repo_name` by `delay`.
    pub fn with_delay(mut self, repo_name: &str, delay: Duration) -> Self {
        Arc::make_mut(&mut self.delays).insert(repo_name.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(SearchUnit, PatternSpec)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Units searched with the full (non-probe) pattern.
    pub fn searched_units(&self) -> Vec<SearchUnit> {
        self.calls()
            .into_iter()
            .filter(|(_, p)| !p.pattern_matches_path || !p.pattern.is_empty())
            .map(|(u, _)| u)
            .collect()
    }
}

#[async_trait]
impl UnindexedSearcher for FnSearcher {
    async fn search(&self, unit: &SearchUnit, pattern: &PatternSpec) -> Result<SearchResponse, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((unit.clone(), pattern.clone()));
        }
        if let Some(delay) = self.delays.get(&unit.repo.name) {
            tokio::time::sleep(*delay).await;
        }
        (self.f)(unit, pattern)
    }
}

type BatchFn = dyn Fn(&[SearchUnit], &PatternSpec) -> Result<SearchResponse, BackendError> + Send + Sync;

/// Index service answering through a closure.
#[derive(Clone)]
pub struct FnIndex {
    f: Arc<BatchFn>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FnIndex {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[SearchUnit], &PatternSpec) -> Result<SearchResponse, BackendError> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Index that finds one `main.go` in every requested unit.
    pub fn single_match_each() -> Self {
        Self::new(|units, _| {
            let matches = units
                .iter()
                .flat_map(|u| single_match(u).matches)
                .collect();
            Ok(SearchResponse::new(matches, false))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexedSearcher for FnIndex {
    async fn search(&self, units: &[SearchUnit], pattern: &PatternSpec) -> Result<SearchResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.f)(units, pattern)
    }
}
