//! Runbook retrieval: the named interface the edge's fetcher implements,
//! plus the GitHub raw-URL transform it applies.

use async_trait::async_trait;

use tarsy_core::error::ProcessingError;

#[async_trait]
pub trait RunbookFetcher: Send + Sync {
    /// Download the runbook markdown for a URL. Failures are recoverable:
    /// the orchestrator proceeds with an empty runbook.
    async fn fetch(&self, url: &str) -> Result<String, ProcessingError>;
}

/// `https://github.com/org/repo/blob/branch/path.md` ->
/// `https://raw.githubusercontent.com/org/repo/branch/path.md`; anything
/// else passes through untouched. The external fetcher applies this before
/// issuing its request.
pub fn to_raw_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://github.com/") {
        if let Some((repo_part, path_part)) = rest.split_once("/blob/") {
            return format!("https://raw.githubusercontent.com/{repo_part}/{path_part}");
        }
    }
    url.to_string()
}
