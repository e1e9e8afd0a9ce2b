//! Inbound VCS event model.
//!
//! The webhook receiver authenticates and deserializes deliveries into
//! these types; the engine routes them. Event types outside this model
//! are acknowledged and ignored before they reach the engine.

use serde::{Deserialize, Serialize};

/// Commit metadata carried by push events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Commit SHA.
    pub sha: String,
    /// Commit author login.
    pub author: String,
    /// Commit message.
    pub message: String,
}

/// A push to a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// The pushed branch.
    pub branch: String,
    /// Head commit of the push.
    pub commit: CommitInfo,
    /// Every path the push changed.
    #[serde(default)]
    pub changed_paths: Vec<String>,
    /// Open change proposal for the branch, when the sender knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

/// Pull request actions the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    /// The proposal was opened.
    Opened,
    /// New commits were pushed to the proposal.
    Synchronize,
    /// The proposal was closed (merged or abandoned).
    Closed,
}

/// A pull request event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestEvent {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Head branch of the proposal.
    pub branch: String,
    /// What happened.
    pub action: PullRequestAction,
    /// Proposal number.
    pub number: u64,
    /// Head commit of the proposal.
    pub head: CommitInfo,
    /// Whether a closed proposal was merged.
    #[serde(default)]
    pub merged: bool,
    /// Proposal URL.
    pub url: String,
}

/// Conclusion of a completed CI check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    /// The run passed.
    Success,
    /// The run failed.
    Failure,
    /// The run hit its time limit.
    TimedOut,
    /// Anything else (skipped, neutral, stale).
    Other,
}

impl CheckConclusion {
    /// Returns true when the conclusion should trigger remediation.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failure | Self::TimedOut)
    }
}

/// A completed CI check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRunEvent {
    /// Repository, `owner/repo`.
    pub source_repo: String,
    /// Branch the run checked.
    pub branch: String,
    /// Commit the run checked.
    pub head_sha: String,
    /// Pipeline name, matched against the primary allow-list.
    pub pipeline: String,
    /// How the run concluded.
    pub conclusion: CheckConclusion,
    /// CI job identifier, for log fetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
}

/// Any supported inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum VcsEvent {
    /// A branch push.
    Push(PushEvent),
    /// A pull request action.
    PullRequest(PullRequestEvent),
    /// A completed check run.
    CheckRun(CheckRunEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_deserialize_from_tagged_payloads() {
        let payload = serde_json::json!({
            "eventType": "push",
            "sourceRepo": "acme/platform",
            "branch": "foreman/goal-1",
            "commit": {"sha": "abc123", "author": "alice", "message": "wire the loader"},
            "changedPaths": ["src/loader.rs"],
        });
        let event: VcsEvent = serde_json::from_value(payload).expect("deserialize");
        match event {
            VcsEvent::Push(push) => {
                assert_eq!(push.commit.sha, "abc123");
                assert_eq!(push.changed_paths, vec!["src/loader.rs".to_string()]);
                assert!(push.pr_number.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn timed_out_counts_as_failure() {
        assert!(CheckConclusion::TimedOut.is_failure());
        assert!(CheckConclusion::Failure.is_failure());
        assert!(!CheckConclusion::Success.is_failure());
        assert!(!CheckConclusion::Other.is_failure());
    }
}
