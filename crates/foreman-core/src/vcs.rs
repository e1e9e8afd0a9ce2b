//! The VCS Provider contract.
//!
//! The version-control host serves diffs and CI logs and accepts review
//! comments. Rate-limit rejections surface as a dedicated error kind
//! carrying the reset timestamp; the engine does not block-wait on them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A parsed `owner/repo` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Repository owner or organization.
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoRef {
    /// Parses an `owner/repo` string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the string is not exactly two
    /// non-empty segments separated by a slash.
    pub fn parse(source_repo: &str) -> Result<Self> {
        match source_repo.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(Error::InvalidInput(format!(
                "expected owner/repo, got '{source_repo}'"
            ))),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// External version-control host.
#[async_trait]
pub trait VcsProvider: Send + Sync {
    /// Fetches the diff of a single commit.
    ///
    /// # Errors
    ///
    /// Returns a provider error on transport failure, `ProviderRateLimit`
    /// when throttled.
    async fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String>;

    /// Fetches the cumulative diff of a pull request.
    ///
    /// # Errors
    ///
    /// Returns a provider error on transport failure, `ProviderRateLimit`
    /// when throttled.
    async fn pull_request_diff(&self, repo: &RepoRef, number: u64) -> Result<String>;

    /// Fetches raw logs for a CI job. Best-effort: callers degrade to an
    /// empty excerpt when this fails.
    ///
    /// # Errors
    ///
    /// Returns a provider error on transport failure, `ProviderRateLimit`
    /// when throttled.
    async fn check_run_logs(&self, repo: &RepoRef, job_id: u64) -> Result<String>;

    /// Posts a review comment on a pull request.
    ///
    /// # Errors
    ///
    /// Returns a provider error on transport failure, `ProviderRateLimit`
    /// when throttled.
    async fn post_pull_request_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<()>;

    /// Posts a comment on a commit.
    ///
    /// # Errors
    ///
    /// Returns a provider error on transport failure, `ProviderRateLimit`
    /// when throttled.
    async fn post_commit_comment(&self, repo: &RepoRef, sha: &str, body: &str) -> Result<()>;
}
