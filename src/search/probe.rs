//! Preflight probe for "repository must / must not contain file" filters
//!
//! Before the full search, ask the same backend a much cheaper question:
//! does this revision contain a path matching each required pattern (and
//! none of the forbidden ones)? A unit that fails the probe is skipped.

use crate::backend::BackendError;
use crate::pattern::PatternSpec;
use crate::revision::SearchUnit;
use crate::search::unit::PerRepoSearcher;

/// Returns `Ok(true)` without any backend call when the pattern has no
/// path filters. Errors carry the same meaning as for the full search.
pub async fn repo_should_be_searched(
    searcher: &PerRepoSearcher<'_>,
    unit: &SearchUnit,
    pattern: &PatternSpec,
) -> Result<bool, BackendError> {
    if !pattern.needs_probe() {
        return Ok(true);
    }

    for path_pattern in &pattern.files_must_include {
        let response = searcher.search(unit, &pattern.probe_for(path_pattern)).await?;
        if response.matches.is_empty() {
            return Ok(false);
        }
    }

    for path_pattern in &pattern.files_must_exclude {
        let response = searcher.search(unit, &pattern.probe_for(path_pattern)).await?;
        if !response.matches.is_empty() {
            return Ok(false);
        }
    }

    Ok(true)
}
