//! HTTP client for the VCS Provider.
//!
//! Speaks a GitHub-shaped REST surface: raw diffs via content
//! negotiation, job logs as plain text, comments as JSON posts.
//! Throttled responses surface as `ProviderRateLimit` with the reset
//! timestamp; callers never block-wait on it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use foreman_core::{Error, RepoRef, Result, VcsProvider};

use super::{http_client, rate_limit_reset, transport_error, DEFAULT_REQUEST_TIMEOUT};

const PROVIDER: &str = "vcs";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";

/// HTTP-backed VCS Provider client.
#[derive(Clone)]
pub struct HttpVcsProvider {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpVcsProvider {
    /// Creates a client targeting the given API base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client with an explicit request timeout.
    #[must_use]
    pub fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: http_client(timeout),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check(&self, response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if let Some(reset_at) = rate_limit_reset(&response) {
            return Err(Error::ProviderRateLimit {
                provider: PROVIDER,
                reset_at,
            });
        }
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                PROVIDER,
                format!("{what} failed with {status}: {detail}"),
            ));
        }
        Ok(response)
    }

    async fn get_text(&self, path: &str, accept: Option<&str>, what: &str) -> Result<String> {
        let mut request = self
            .client
            .get(self.endpoint(path))
            .bearer_auth(&self.token);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;
        self.check(response, what)
            .await?
            .text()
            .await
            .map_err(|e| transport_error(PROVIDER, &e))
    }

    async fn post_comment(&self, path: &str, body: &str, what: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.token)
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;
        self.check(response, what).await.map(|_| ())
    }
}

#[async_trait]
impl VcsProvider for HttpVcsProvider {
    async fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String> {
        self.get_text(
            &format!("repos/{}/{}/commits/{sha}", repo.owner, repo.repo),
            Some(DIFF_MEDIA_TYPE),
            "commit diff fetch",
        )
        .await
    }

    async fn pull_request_diff(&self, repo: &RepoRef, number: u64) -> Result<String> {
        self.get_text(
            &format!("repos/{}/{}/pulls/{number}", repo.owner, repo.repo),
            Some(DIFF_MEDIA_TYPE),
            "pull request diff fetch",
        )
        .await
    }

    async fn check_run_logs(&self, repo: &RepoRef, job_id: u64) -> Result<String> {
        self.get_text(
            &format!("repos/{}/{}/actions/jobs/{job_id}/logs", repo.owner, repo.repo),
            None,
            "check run log fetch",
        )
        .await
    }

    async fn post_pull_request_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<()> {
        self.post_comment(
            &format!("repos/{}/{}/issues/{number}/comments", repo.owner, repo.repo),
            body,
            "pull request comment",
        )
        .await
    }

    async fn post_commit_comment(&self, repo: &RepoRef, sha: &str, body: &str) -> Result<()> {
        self.post_comment(
            &format!("repos/{}/{}/commits/{sha}/comments", repo.owner, repo.repo),
            body,
            "commit comment",
        )
        .await
    }
}

impl std::fmt::Debug for HttpVcsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVcsProvider")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
