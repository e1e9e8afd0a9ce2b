//! HTTP client for the Auditor oracle service.
//!
//! The oracle sits behind a narrow JSON API: `POST /review` takes a
//! [`ReviewInput`] and returns an [`AuditReport`]; `POST /decompose`
//! takes a [`DecomposeInput`] and returns a [`CascadeAnalysis`]. The
//! LLM plumbing lives entirely on the other side of that contract.

use std::time::Duration;

use async_trait::async_trait;
use foreman_core::{
    AuditReport, AuditorOracle, CascadeAnalysis, DecomposeInput, Error, Result, ReviewInput,
};

use super::{http_client, transport_error, DEFAULT_REQUEST_TIMEOUT};

const PROVIDER: &str = "auditor";

/// HTTP-backed auditor oracle.
#[derive(Clone)]
pub struct HttpAuditorOracle {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpAuditorOracle {
    /// Creates a client targeting the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_timeout(base_url, api_key, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client with an explicit request timeout.
    #[must_use]
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: http_client(timeout),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: serde::Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                PROVIDER,
                format!("{path} returned {status}: {detail}"),
            ));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("{path} contract violation: {e}")))
    }
}

#[async_trait]
impl AuditorOracle for HttpAuditorOracle {
    async fn review(&self, input: ReviewInput) -> Result<AuditReport> {
        self.post_json("review", &input).await
    }

    async fn decompose(&self, input: DecomposeInput) -> Result<CascadeAnalysis> {
        let analysis: CascadeAnalysis = self.post_json("decompose", &input).await?;
        if !(0.0..=1.0).contains(&analysis.confidence) {
            return Err(Error::provider(
                PROVIDER,
                format!("confidence {} outside [0, 1]", analysis.confidence),
            ));
        }
        Ok(analysis)
    }
}

impl std::fmt::Debug for HttpAuditorOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuditorOracle")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
