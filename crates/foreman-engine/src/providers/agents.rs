//! HTTP client for the Agent Provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use foreman_core::{
    AgentHandle, AgentProvider, AgentSnapshot, AgentSpec, AgentStatus, Error, Result,
};

use super::{http_client, transport_error, DEFAULT_REQUEST_TIMEOUT};

const PROVIDER: &str = "agents";

/// Wire shape of `GET /v1/agents/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentResource {
    status: AgentStatus,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    outputs: Option<AgentOutputs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentOutputs {
    #[serde(default)]
    change_proposal: Option<ChangeProposal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeProposal {
    #[serde(default)]
    url: Option<String>,
}

/// HTTP-backed Agent Provider client.
///
/// Authenticates with a single API key header. Dispatch is never
/// retried here; a failed create surfaces to the caller, which marks
/// the session failed.
#[derive(Clone)]
pub struct HttpAgentProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpAgentProvider {
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
}

#[async_trait]
impl AgentProvider for HttpAgentProvider {
    async fn create_agent(&self, spec: AgentSpec) -> Result<AgentHandle> {
        let response = self
            .client
            .post(self.endpoint("v1/agents"))
            .header("x-api-key", &self.api_key)
            .json(&spec)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                PROVIDER,
                format!("agent create rejected with {status}: {detail}"),
            ));
        }
        response
            .json::<AgentHandle>()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("agent create contract violation: {e}")))
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentSnapshot> {
        let response = self
            .client
            .get(self.endpoint(&format!("v1/agents/{agent_id}")))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::resource_not_found("agent", agent_id));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                PROVIDER,
                format!("agent poll failed with {status}: {detail}"),
            ));
        }
        let resource = response
            .json::<AgentResource>()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("agent poll contract violation: {e}")))?;

        Ok(AgentSnapshot {
            status: resource.status,
            url: resource.url,
            change_proposal_url: resource
                .outputs
                .and_then(|o| o.change_proposal)
                .and_then(|p| p.url),
        })
    }
}

impl std::fmt::Debug for HttpAgentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgentProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
