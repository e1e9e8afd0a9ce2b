//! Sessions: the supervised unit of agent work.
//!
//! A session binds an external coding agent to a branch, a parent goal,
//! and an exclusive set of file locks. Status transitions are mediated
//! exclusively by the lifecycle engine; `completed` and `failed` are
//! terminal and a terminal session never holds locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CascadeId, GoalId, SessionId};

/// The maximum number of self-healing generations below an original
/// session. A session is never dispatched with a greater depth.
pub const MAX_REMEDIATION_DEPTH: u32 = 3;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet confirmed by the Agent Provider.
    Queued,
    /// The Agent Provider has a live agent working.
    Executing,
    /// The agent produced a change proposal; CI and review are running.
    Verifying,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl SessionStatus {
    /// Returns true for `completed` and `failed`; no transition leaves
    /// a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "executing" => Ok(Self::Executing),
            "verifying" => Ok(Self::Verifying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// Inputs for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    /// Owning goal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    /// Owning cascade, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_id: Option<CascadeId>,
    /// Repository the agent works against, `owner/repo`.
    pub source_repo: String,
    /// Branch the agent commits to.
    pub branch_name: String,
    /// Branch the work will merge into.
    pub base_branch: String,
    /// Self-healing generation. Zero for operator-initiated work.
    #[serde(default)]
    pub remediation_depth: u32,
}

/// A session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Owning goal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    /// Owning cascade, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_id: Option<CascadeId>,
    /// Repository the agent works against, `owner/repo`.
    pub source_repo: String,
    /// Branch the agent commits to.
    pub branch_name: String,
    /// Branch the work will merge into.
    pub base_branch: String,
    /// Agent Provider identifier, set once the provider confirms.
    /// Globally unique when non-null.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_agent_id: Option<String>,
    /// Agent Provider URL for the running agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_agent_url: Option<String>,
    /// The last commit the review loop processed. Used to suppress
    /// duplicate webhook deliveries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed_commit: Option<String>,
    /// Self-healing generation, bounded by [`MAX_REMEDIATION_DEPTH`].
    pub remediation_depth: u32,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Failure detail when the session failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the session was last reconciled against the Agent Provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates a queued session from a spec.
    #[must_use]
    pub fn from_spec(spec: SessionSpec) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            goal_id: spec.goal_id,
            cascade_id: spec.cascade_id,
            source_repo: spec.source_repo,
            branch_name: spec.branch_name,
            base_branch: spec.base_branch,
            external_agent_id: None,
            external_agent_url: None,
            last_reviewed_commit: None,
            remediation_depth: spec.remediation_depth,
            status: SessionStatus::Queued,
            last_error: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once the session reached `completed` or `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true when another remediation generation may be spawned
    /// below this session.
    #[must_use]
    pub fn can_spawn_repair(&self) -> bool {
        self.remediation_depth < MAX_REMEDIATION_DEPTH
    }
}

/// An exclusive file lock held by a session.
///
/// `file_path` is globally unique across all live locks; lock lifetime is
/// bounded by the session's lifetime as a non-terminal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    /// Repository-relative path.
    pub file_path: String,
    /// The holding session.
    pub session_id: SessionId,
    /// When the lock was taken.
    pub locked_at: DateTime<Utc>,
}
