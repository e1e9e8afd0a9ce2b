//! The Agent Provider contract.
//!
//! The Agent Provider is the external service that actually runs AI
//! coding agents and produces change proposals. Foreman only creates
//! agents and polls their status; it never executes code itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::SessionStatus;

/// Inputs for starting an external agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// The instruction the agent starts from.
    pub prompt: String,
    /// Repository the agent works against, `owner/repo`.
    pub source_repo: String,
    /// Branch the agent starts on.
    pub starting_branch: String,
    /// Extra context forwarded verbatim to the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A confirmed agent: provider identifier plus a URL for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHandle {
    /// Provider-assigned identifier. Globally unique.
    pub id: String,
    /// Where the operator can watch the agent.
    pub url: String,
}

/// Provider-side status codes for a running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// The agent is planning its work.
    Planning,
    /// The agent is making changes.
    Running,
    /// The agent finished and produced its outputs.
    Completed,
    /// The agent failed.
    Failed,
    /// The agent was cancelled on the provider side.
    Cancelled,
    /// A status code this build does not know. Never moves a session.
    #[serde(other)]
    Unknown,
}

impl AgentStatus {
    /// Maps the provider status onto the internal session status.
    ///
    /// Returns `None` for provider states that do not move the session
    /// (the sync pass treats those as a no-op).
    #[must_use]
    pub fn session_status(self) -> Option<SessionStatus> {
        match self {
            Self::Planning | Self::Running => Some(SessionStatus::Executing),
            Self::Completed => Some(SessionStatus::Completed),
            Self::Failed | Self::Cancelled => Some(SessionStatus::Failed),
            Self::Unknown => None,
        }
    }
}

/// A point-in-time view of an agent, as returned by a status poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    /// Provider-side status.
    pub status: AgentStatus,
    /// Where the operator can watch the agent, when the provider returns it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// URL of the change proposal the agent produced, once one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_proposal_url: Option<String>,
}

/// External service that runs AI coding agents.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Starts a new agent.
    ///
    /// A single failed dispatch is not retried by the engine; the session
    /// goes failed and the error surfaces to the operator.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the provider rejects the request or
    /// is unreachable.
    async fn create_agent(&self, spec: AgentSpec) -> Result<AgentHandle>;

    /// Polls one agent's status.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the agent is unknown or the provider
    /// is unreachable.
    async fn get_agent(&self, agent_id: &str) -> Result<AgentSnapshot>;
}
