use crate::revision::RepositoryRevisions;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type Resolved = Option<Arc<Vec<RepositoryRevisions>>>;

/// Write-once, read-many handle to the repository set of a search.
///
/// The API layer resolves it once repository filters have been evaluated;
/// any number of readers may wait on it concurrently.
#[derive(Debug)]
pub struct RepoPromise {
    tx: watch::Sender<Resolved>,
}

impl Default for RepoPromise {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoPromise {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// A promise that is already resolved.
    pub fn resolved(repos: Vec<RepositoryRevisions>) -> Self {
        let promise = Self::new();
        promise.resolve(repos);
        promise
    }

    /// Resolve the promise. Only the first call has an effect; returns
    /// whether this call was the one that resolved it.
    pub fn resolve(&self, repos: Vec<RepositoryRevisions>) -> bool {
        let mut value = Some(Arc::new(repos));
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = value.take();
                true
            } else {
                false
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait for the repository set, or fail with `Canceled` if `cancel` fires first.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<Arc<Vec<RepositoryRevisions>>> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Canceled),
            resolved = rx.wait_for(Option::is_some) => {
                let guard = resolved.map_err(|_| Error::Canceled)?;
                (*guard).clone().ok_or(Error::Canceled)
            }
        }
    }
}
